//! Parsing of `name=value` arguments given on the command line.

use std::collections::BTreeMap;

use tracing::warn;

/// Splits each item on its first `=` into a map.
///
/// Items without `=` or with an empty name are logged and skipped. A later
/// item overrides an earlier one with the same name.
pub fn parse_name_values<I, S>(items: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut values = BTreeMap::new();

    for item in items {
        let item = item.as_ref();

        match item.split_once('=') {
            Some((name, value)) if !name.trim().is_empty() => {
                values.insert(name.trim().to_string(), value.to_string());
            }
            _ => warn!("Invalid name/value {}", item),
        }
    }

    values
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_name_values() {
        let values = parse_name_values(["memory=512", "substitutions=a=b", "bogus", "=x"]);

        assert_eq!(values.len(), 2);
        assert_eq!(values["memory"], "512");
        assert_eq!(values["substitutions"], "a=b");
    }

    #[test]
    fn test_later_value_wins() {
        let values = parse_name_values(vec!["a=1".to_string(), "a=2".to_string()]);

        assert_eq!(values["a"], "2");
    }
}
