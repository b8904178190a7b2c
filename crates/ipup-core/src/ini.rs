//! Minimal INI reader driving a per-line callback.
//!
//! The reader owns only the surface syntax: `[section]` headers,
//! `key = value` pairs, blank lines, `;`/`#` comments. Everything else
//! is the handler's business; a handler rejection aborts the whole
//! parse with the offending line number attached.

use crate::error::{Error, Result};

/// Receives each parsed `key = value` pair with its enclosing section.
/// A returned message rejects the line and stops the parse.
pub trait Handler {
    fn pair(&mut self, section: &str, key: &str, value: &str) -> std::result::Result<(), String>;
}

pub fn parse<H: Handler>(source: &str, path: &str, handler: &mut H) -> Result<()> {
    let mut section = String::new();

    for (idx, raw) in source.lines().enumerate() {
        let line = raw.trim();
        let lineno = idx + 1;

        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }

        if let Some(rest) = line.strip_prefix('[') {
            let Some(name) = rest.strip_suffix(']') else {
                return Err(Error::parse(path, lineno, "unterminated section header"));
            };
            let name = name.trim();
            if name.is_empty() {
                return Err(Error::parse(path, lineno, "empty section name"));
            }
            section = name.to_owned();
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            return Err(Error::parse(path, lineno, "expected `key = value`"));
        };
        let key = key.trim();
        let value = value.trim();

        if key.is_empty() {
            return Err(Error::parse(path, lineno, "missing option name"));
        }
        if section.is_empty() {
            return Err(Error::parse(path, lineno, "option outside of a section"));
        }

        handler
            .pair(&section, key, value)
            .map_err(|msg| Error::parse(path, lineno, msg))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Collector {
        pairs: Vec<(String, String, String)>,
        reject: Option<&'static str>,
    }

    impl Handler for Collector {
        fn pair(&mut self, section: &str, key: &str, value: &str) -> std::result::Result<(), String> {
            if let Some(key_to_reject) = self.reject {
                if key == key_to_reject {
                    return Err(format!("unknown option: {key}"));
                }
            }
            self.pairs
                .push((section.to_owned(), key.to_owned(), value.to_owned()));
            Ok(())
        }
    }

    #[test]
    fn sections_carry_over_pairs() {
        let input = "\
; lead comment
[server/ns1]
host = ns1.example.com
port = 53

# another comment
[iface/eth0]
server = ns1
";
        let mut handler = Collector::default();
        parse(input, "test.conf", &mut handler).unwrap();

        assert_eq!(
            handler.pairs,
            vec![
                ("server/ns1".into(), "host".into(), "ns1.example.com".into()),
                ("server/ns1".into(), "port".into(), "53".into()),
                ("iface/eth0".into(), "server".into(), "ns1".into()),
            ]
        );
    }

    #[test]
    fn malformed_line_reports_its_number() {
        let input = "[server/a]\nhost = x\nbogus line\n";
        let mut handler = Collector::default();
        let err = parse(input, "bad.conf", &mut handler).unwrap_err();
        assert_eq!(err.to_string(), "bad.conf:3: expected `key = value`");
    }

    #[test]
    fn pair_before_any_section_is_rejected() {
        let mut handler = Collector::default();
        let err = parse("a = b\n", "bad.conf", &mut handler).unwrap_err();
        assert!(err.to_string().contains("outside of a section"));
    }

    #[test]
    fn handler_rejection_aborts_with_location() {
        let input = "[server/a]\ngood = 1\nweird = 2\nnever = 3\n";
        let mut handler = Collector {
            reject: Some("weird"),
            ..Default::default()
        };
        let err = parse(input, "conf", &mut handler).unwrap_err();
        assert_eq!(err.to_string(), "conf:3: unknown option: weird");
        assert_eq!(handler.pairs.len(), 1);
    }

    #[test]
    fn unterminated_section_fails() {
        let mut handler = Collector::default();
        assert!(parse("[server/a\n", "c", &mut handler).is_err());
        assert!(parse("[]\n", "c", &mut handler).is_err());
    }
}
