//! Exact string match after normalization.
//!
//! Keyword case, whitespace, trailing semicolons, identifier quoting and
//! padding around punctuation are ignored. String literal contents are
//! compared as written.

const TIGHT: &[char] = &['(', ')', ',', '=', '<', '>', '!', '+', '-', '*', '/', '.', ';', '|'];

fn push_piece(out: &mut String, piece: &str, pending_space: &mut bool) {
    if *pending_space {
        let after_tight = out.chars().last().map_or(true, |c| TIGHT.contains(&c));
        let before_tight = piece.chars().next().map_or(true, |c| TIGHT.contains(&c));
        if !after_tight && !before_tight {
            out.push(' ');
        }
        *pending_space = false;
    }
    out.push_str(piece);
}

/// Read a quoted run starting after the opening quote at `start`; returns
/// the unescaped contents and the index after the closing quote.
fn read_quoted(chars: &[char], start: usize, close: char, doubled_escape: bool) -> (String, usize) {
    let mut content = String::new();
    let mut i = start;
    while i < chars.len() {
        let c = chars[i];
        if c == close {
            if doubled_escape && chars.get(i + 1) == Some(&close) {
                content.push(close);
                i += 2;
                continue;
            }
            return (content, i + 1);
        }
        content.push(c);
        i += 1;
    }
    (content, i)
}

pub fn normalize(sql: &str) -> String {
    let chars: Vec<char> = sql.trim().chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut pending_space = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => {
                pending_space = true;
                i += 1;
            }
            '\'' | '"' => {
                let (content, next) = read_quoted(&chars, i + 1, c, true);
                let literal = format!("'{}'", content.replace('\'', "''"));
                push_piece(&mut out, &literal, &mut pending_space);
                i = next;
            }
            '`' | '[' => {
                let close = if c == '[' { ']' } else { '`' };
                let (content, next) = read_quoted(&chars, i + 1, close, c == '`');
                push_piece(&mut out, &content.to_lowercase(), &mut pending_space);
                i = next;
            }
            _ => {
                let lowered: String = c.to_lowercase().collect();
                push_piece(&mut out, &lowered, &mut pending_space);
                i += 1;
            }
        }
    }

    out.trim_end_matches(|c: char| c == ';' || c.is_whitespace())
        .to_string()
}

pub fn matches(gold: &str, predicted: &str) -> bool {
    normalize(gold) == normalize(predicted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_case_and_semicolons_ignored() {
        assert!(matches(
            "SELECT count(*) FROM singer;",
            "select COUNT( * )\n  from singer"
        ));
        assert!(matches("SELECT a FROM t;;", "SELECT a FROM t"));
    }

    #[test]
    fn test_quoting_normalized() {
        assert!(matches(
            "SELECT name FROM singer WHERE country = \"France\"",
            "SELECT `name` FROM [singer] WHERE country = 'France'"
        ));
    }

    #[test]
    fn test_literal_contents_matter() {
        assert!(!matches(
            "SELECT * FROM t WHERE a = 'France'",
            "SELECT * FROM t WHERE a = 'france'"
        ));
        assert!(!matches("SELECT a FROM t", "SELECT b FROM t"));
    }

    #[test]
    fn test_normalize_is_deterministic() {
        let sql = "SELECT  T1.name ,  T2.age FROM a AS T1 JOIN b AS T2 ON T1.id = T2.id ;";
        assert_eq!(normalize(sql), normalize(sql));
        assert_eq!(
            normalize(sql),
            "select t1.name,t2.age from a as t1 join b as t2 on t1.id=t2.id"
        );
    }
}
