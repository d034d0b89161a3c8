/// Centinel: the self-describing, line-oriented tabular text format used
/// for the core's input datasets (demographic rates, mortality tables,
/// immigration counts, and the like).
///
/// On read: any line not starting with `|` is a comment. The first `|`-line
/// is the column-header line; every later `|`-line is a data line. Each
/// header token is one of:
///   - a bare label — an index column; its cells select which row(s) of the
///     output a line contributes to, and may be a broadcast list
///     (`0,3~5,2` expands to `0,3,4,5,2`, each getting a copy of the row).
///   - a label immediately followed by digits (`sex1`) — a column frozen at
///     that value for the whole file. Frozen columns carry no data cell of
///     their own; the value comes entirely from the header token. (The
///     header line never says which reading is intended beyond this; this
///     is the resolution recorded in the design ledger.)
///   - the last header token — the payload (value) column.
///
/// Per the design note on Centinel's complexity, broadcast expansion is
/// supported only for reading existing datasets; the writer emits the
/// simpler, one-row-per-record form (no broadcast compression) regardless
/// of which separator is selected.
use crate::error::{SimError, SimResult};

#[derive(Debug, Clone)]
pub struct Table {
    pub header: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Separator {
    Space,
    Tab,
    Comma,
    Newline,
    Pipe,
}

impl Separator {
    fn as_str(self) -> &'static str {
        match self {
            Separator::Space => " ",
            Separator::Tab => "\t",
            Separator::Comma => ",",
            Separator::Newline => "\n",
            Separator::Pipe => "|",
        }
    }
}

#[derive(Debug, Clone)]
enum HeaderColumn {
    Index(String),
    Frozen(String, i64),
    Value(String),
}

/// An optional linear rescale applied to payload values on read:
/// `r=x*m+b`, with `/m` or `-b` abbreviations, and `n` substituted for `x`
/// to additionally truncate the result to an integer.
#[derive(Debug, Clone, Copy)]
pub struct Rescale {
    m: f64,
    b: f64,
    truncate: bool,
}

impl Rescale {
    pub fn parse(spec: &str) -> SimResult<Rescale> {
        let body = spec.strip_prefix("r=").unwrap_or(spec);
        let mut chars = body.chars();
        let truncate = match chars.next() {
            Some('x') => false,
            Some('n') => true,
            _ => {
                return Err(SimError::UserInput {
                    line: 0,
                    reason: format!("rescale spec must start with x or n: {spec}"),
                })
            }
        };
        let rest: String = chars.collect();
        let mut m = 1.0f64;
        let mut b = 0.0f64;
        let mut remainder = rest.as_str();

        if let Some(tail) = remainder.strip_prefix('*') {
            let (num, rem) = take_number(tail)?;
            m = num;
            remainder = rem;
        } else if let Some(tail) = remainder.strip_prefix('/') {
            let (num, rem) = take_number(tail)?;
            if num == 0.0 {
                return Err(SimError::UserInput {
                    line: 0,
                    reason: "rescale divisor is zero".into(),
                });
            }
            m = 1.0 / num;
            remainder = rem;
        }

        if let Some(tail) = remainder.strip_prefix('+') {
            let (num, rem) = take_number(tail)?;
            b = num;
            remainder = rem;
        } else if let Some(tail) = remainder.strip_prefix('-') {
            let (num, rem) = take_number(tail)?;
            b = -num;
            remainder = rem;
        }

        if !remainder.is_empty() {
            return Err(SimError::UserInput {
                line: 0,
                reason: format!("trailing characters in rescale spec: {spec}"),
            });
        }

        Ok(Rescale { m, b, truncate })
    }

    pub fn apply(&self, x: f64) -> f64 {
        let v = self.m * x + self.b;
        if self.truncate { v.trunc() } else { v }
    }
}

fn take_number(s: &str) -> SimResult<(f64, &str)> {
    let end = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == 'e' || c == 'E'))
        .unwrap_or(s.len());
    let (digits, rest) = s.split_at(end);
    let n: f64 = digits.parse().map_err(|_| SimError::UserInput {
        line: 0,
        reason: format!("expected a number in rescale spec near '{s}'"),
    })?;
    Ok((n, rest))
}

/// Expand a broadcast-list cell (`0,3~5,2`) into its integer values.
fn parse_index_list(cell: &str, line_no: usize) -> SimResult<Vec<i64>> {
    let mut out = Vec::new();
    for part in cell.split(',') {
        let part = part.trim();
        if let Some((lo, hi)) = part.split_once('~') {
            let lo: i64 = lo.trim().parse().map_err(|_| malformed(line_no, part))?;
            let hi: i64 = hi.trim().parse().map_err(|_| malformed(line_no, part))?;
            if hi < lo {
                return Err(SimError::TableIntegrity {
                    location: format!("line {line_no}"),
                    reason: format!("non-monotone range '{part}'"),
                });
            }
            out.extend(lo..=hi);
        } else {
            out.push(part.parse().map_err(|_| malformed(line_no, part))?);
        }
    }
    Ok(out)
}

fn malformed(line_no: usize, cell: &str) -> SimError {
    SimError::TableIntegrity {
        location: format!("line {line_no}"),
        reason: format!("spurious characters in index cell '{cell}'"),
    }
}

fn parse_header(line: &str) -> Vec<HeaderColumn> {
    let tokens: Vec<&str> = line.trim_start_matches('|').split('|').map(str::trim).collect();
    let last = tokens.len() - 1;
    tokens
        .into_iter()
        .enumerate()
        .map(|(i, tok)| {
            let split_at = tok.find(|c: char| c.is_ascii_digit());
            if i != last {
                if let Some(pos) = split_at {
                    if pos > 0 {
                        let (label, digits) = tok.split_at(pos);
                        if let Ok(v) = digits.parse::<i64>() {
                            return HeaderColumn::Frozen(label.to_string(), v);
                        }
                    }
                }
                HeaderColumn::Index(tok.to_string())
            } else {
                HeaderColumn::Value(tok.to_string())
            }
        })
        .collect()
}

/// Parse a Centinel-format document into a flat `Table`, with any broadcast
/// index lists expanded into one row per combination and `rescale` (if
/// given) applied to every payload value.
pub fn read(text: &str, rescale: Option<&Rescale>) -> SimResult<Table> {
    let mut header: Option<Vec<HeaderColumn>> = None;
    let mut rows: Vec<Vec<f64>> = Vec::new();

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        if !raw.starts_with('|') {
            continue; // comment line
        }
        if header.is_none() {
            header = Some(parse_header(raw));
            continue;
        }
        let cols = header.as_ref().unwrap();
        let data_cells: Vec<&str> =
            raw.trim_start_matches('|').split('|').map(str::trim).collect();
        let non_frozen: Vec<&HeaderColumn> =
            cols.iter().filter(|c| !matches!(c, HeaderColumn::Frozen(..))).collect();
        if data_cells.len() != non_frozen.len() {
            return Err(SimError::TableIntegrity {
                location: format!("line {line_no}"),
                reason: format!(
                    "expected {} data cells, found {}",
                    non_frozen.len(),
                    data_cells.len()
                ),
            });
        }

        // One list per non-frozen, non-value column (index columns), plus
        // the value column's own list.
        let mut index_lists: Vec<Vec<i64>> = Vec::new();
        let mut value_list: Vec<f64> = Vec::new();
        for (col, cell) in non_frozen.iter().zip(data_cells.iter()) {
            match col {
                HeaderColumn::Index(_) => index_lists.push(parse_index_list(cell, line_no)?),
                HeaderColumn::Value(_) => {
                    for part in cell.split(',') {
                        let v: f64 = part.trim().parse().map_err(|_| malformed(line_no, part))?;
                        value_list.push(v);
                    }
                }
                HeaderColumn::Frozen(..) => unreachable!(),
            }
        }

        let lengths = index_lists.iter().map(Vec::len).chain(std::iter::once(value_list.len()));
        let broadcast_len = lengths.clone().filter(|&n| n > 1).max().unwrap_or(1);
        if lengths.filter(|&n| n > 1 && n != broadcast_len).count() > 0 {
            return Err(SimError::TableIntegrity {
                location: format!("line {line_no}"),
                reason: "broadcast lists on one line have mismatched lengths".into(),
            });
        }

        for b in 0..broadcast_len {
            let mut row = Vec::with_capacity(cols.len());
            let mut idx_iter = index_lists.iter();
            for col in cols {
                match col {
                    HeaderColumn::Frozen(_, v) => row.push(*v as f64),
                    HeaderColumn::Index(_) => {
                        let lst = idx_iter.next().unwrap();
                        let v = if lst.len() == 1 { lst[0] } else { lst[b] };
                        row.push(v as f64);
                    }
                    HeaderColumn::Value(_) => {
                        let v = if value_list.len() == 1 { value_list[0] } else { value_list[b] };
                        row.push(rescale.map_or(v, |r| r.apply(v)));
                    }
                }
            }
            rows.push(row);
        }
    }

    let header = header.ok_or_else(|| SimError::TableIntegrity {
        location: "line 1".into(),
        reason: "no header line found (no line begins with '|')".into(),
    })?;
    let labels = header
        .into_iter()
        .map(|c| match c {
            HeaderColumn::Index(l) => l,
            HeaderColumn::Frozen(l, v) => format!("{l}{v}"),
            HeaderColumn::Value(l) => l,
        })
        .collect();

    Ok(Table { header: labels, rows })
}

/// Write `table` using the given separator. For `Separator::Pipe` this
/// emits the self-describing form (one row per record, no broadcast
/// compression); every other separator just joins fields plainly.
pub fn write(table: &Table, sep: Separator) -> String {
    let mut out = String::new();
    let field_sep = sep.as_str();
    let prefix = if sep == Separator::Pipe { "|" } else { "" };

    out.push_str(prefix);
    out.push_str(&table.header.join(field_sep));
    out.push('\n');
    for row in &table.rows {
        out.push_str(prefix);
        let fields: Vec<String> = row.iter().map(|v| v.to_string()).collect();
        out.push_str(&fields.join(field_sep));
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rescale_full_form() {
        let r = Rescale::parse("r=x*2+1").unwrap();
        assert_eq!(r.apply(3.0), 7.0);
    }

    #[test]
    fn rescale_divisor_and_truncate() {
        let r = Rescale::parse("r=n/4-1").unwrap();
        assert_eq!(r.apply(10.0), (10.0 / 4.0 - 1.0).trunc());
    }

    #[test]
    fn broadcast_list_expands_ranges_and_singles() {
        let v = parse_index_list("0,3~5,2", 1).unwrap();
        assert_eq!(v, vec![0, 3, 4, 5, 2]);
    }

    #[test]
    fn read_simple_table_with_frozen_column() {
        let text = "# comment\n|age|sex1|rate\n|0|0.01\n|1|0.02\n";
        let table = read(text, None).unwrap();
        assert_eq!(table.header, vec!["age", "sex1", "rate"]);
        assert_eq!(table.rows, vec![vec![0.0, 1.0, 0.01], vec![1.0, 1.0, 0.02]]);
    }

    #[test]
    fn read_broadcasts_index_list_across_rows() {
        let text = "|age|rate\n|0,3~5,2|9.0\n";
        let table = read(text, None).unwrap();
        assert_eq!(table.rows.len(), 5);
        assert!(table.rows.iter().all(|r| r[1] == 9.0));
        assert_eq!(
            table.rows.iter().map(|r| r[0] as i64).collect::<Vec<_>>(),
            vec![0, 3, 4, 5, 2]
        );
    }

    #[test]
    fn read_applies_rescale_to_payload_only() {
        let text = "|age|value\n|1|10\n";
        let r = Rescale::parse("r=x*2").unwrap();
        let table = read(text, Some(&r)).unwrap();
        assert_eq!(table.rows[0], vec![1.0, 20.0]);
    }

    #[test]
    fn malformed_row_reports_line_number() {
        let text = "|age|value\n|1|bad\n";
        let err = read(text, None).unwrap_err();
        match err {
            SimError::TableIntegrity { location, .. } => assert_eq!(location, "line 2"),
            other => panic!("expected TableIntegrity, got {other:?}"),
        }
    }

    #[test]
    fn writer_supports_comma_and_pipe_separators() {
        let table = Table { header: vec!["a".into(), "b".into()], rows: vec![vec![1.0, 2.0]] };
        assert_eq!(write(&table, Separator::Comma), "a,b\n1,2\n");
        assert_eq!(write(&table, Separator::Pipe), "|a|b\n|1|2\n");
    }
}
