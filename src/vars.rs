// src/vars.rs

//! `$VARIABLE` expansion in build-setting values
//!
//! Values may reference `$NAME` or `${NAME}`; `$$` produces a literal `$`.
//! The lookup is supplied by the caller so that package-scoped names
//! (`PACKAGE_DIR` and friends) and plain environment variables share one
//! code path.

use crate::error::{Error, Result};

/// Expand all variable references in `input`
///
/// `lookup` maps a variable name to its value; returning `None` makes the
/// expansion fail with [`Error::UnknownVariable`]. Strings without `$` are
/// returned unchanged, and expansion is idempotent on fully expanded
/// values.
pub fn expand_vars(input: &str, mut lookup: impl FnMut(&str) -> Option<String>) -> Result<String> {
    if !input.contains('$') {
        return Ok(input.to_string());
    }

    let mut out = String::with_capacity(input.len());
    let mut chars = input.char_indices().peekable();
    while let Some((_, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some(&(_, '$')) => {
                chars.next();
                out.push('$');
            }
            Some(&(_, '{')) => {
                chars.next();
                let mut name = String::new();
                let mut closed = false;
                for (_, c) in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    name.push(c);
                }
                if !closed {
                    return Err(Error::invalid(format!(
                        "unterminated variable reference in '{}'",
                        input
                    )));
                }
                out.push_str(&resolve(&name, &mut lookup)?);
            }
            _ => {
                let mut name = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        name.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push_str(&resolve(&name, &mut lookup)?);
            }
        }
    }
    Ok(out)
}

fn resolve(name: &str, lookup: &mut impl FnMut(&str) -> Option<String>) -> Result<String> {
    if name.is_empty() {
        return Err(Error::invalid("dangling '$' in build setting value"));
    }
    lookup(name).ok_or_else(|| Error::UnknownVariable(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(name: &str) -> Option<String> {
        match name {
            "PACKAGE_DIR" => Some("/work/pkg".to_string()),
            "ROOT_PACKAGE_DIR" => Some("/work/root".to_string()),
            _ => None,
        }
    }

    #[test]
    fn test_identity_without_dollar() {
        assert_eq!(expand_vars("plain value", env).unwrap(), "plain value");
    }

    #[test]
    fn test_simple_expansion() {
        assert_eq!(
            expand_vars("$PACKAGE_DIR/source", env).unwrap(),
            "/work/pkg/source"
        );
    }

    #[test]
    fn test_braced_expansion() {
        assert_eq!(
            expand_vars("${ROOT_PACKAGE_DIR}/x", env).unwrap(),
            "/work/root/x"
        );
    }

    #[test]
    fn test_escaped_dollar() {
        assert_eq!(expand_vars("cost: $$5", env).unwrap(), "cost: $5");
    }

    #[test]
    fn test_unknown_variable() {
        assert!(matches!(
            expand_vars("$NOPE", env),
            Err(Error::UnknownVariable(name)) if name == "NOPE"
        ));
    }

    #[test]
    fn test_idempotent_on_expanded() {
        let once = expand_vars("$PACKAGE_DIR/a", env).unwrap();
        assert_eq!(expand_vars(&once, env).unwrap(), once);
    }

    #[test]
    fn test_dangling_dollar() {
        assert!(expand_vars("bad$", env).is_err());
        assert!(expand_vars("${open", env).is_err());
    }
}
