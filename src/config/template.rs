//! `{{ name }}` placeholder expansion for manifest strings.
use std::collections::BTreeMap;

use crate::error::ValidationError;

/// Why a template could not be expanded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    /// The placeholder names a variable that is not defined.
    Undefined(String),
    /// `{{` without a matching `}}`, or an invalid variable name.
    Malformed(String),
}

/// Variables available to templates, layered by precedence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Vars {
    values: BTreeMap<String, String>,
}

impl Vars {
    /// Create an empty variable set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `layer` on top of the current values; later layers win.
    #[must_use]
    pub fn layer<I, K, V>(mut self, layer: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in layer {
            self.values.insert(k.into(), v.into());
        }
        self
    }

    /// Look up a variable.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Expand every `{{ name }}` placeholder in `input`.
    ///
    /// Whitespace inside the braces is ignored. Names may contain ASCII
    /// letters, digits, `_` and `-`.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::Undefined`] for unknown variables and
    /// [`TemplateError::Malformed`] for unterminated or empty placeholders.
    ///
    /// # Examples
    ///
    /// ```
    /// use provision_cli::config::template::Vars;
    ///
    /// let vars = Vars::new().layer([("fedora_version", "40")]);
    /// assert_eq!(
    ///     vars.expand("rpmfusion-free-release-{{ fedora_version }}.noarch.rpm").unwrap(),
    ///     "rpmfusion-free-release-40.noarch.rpm"
    /// );
    /// ```
    pub fn expand(&self, input: &str) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(input.len());
        let mut rest = input;
        while let Some(start) = rest.find("{{") {
            let (before, after_open) = rest.split_at(start);
            out.push_str(before);
            let after_open = after_open.get(2..).unwrap_or_default();
            let Some(end) = after_open.find("}}") else {
                return Err(TemplateError::Malformed(rest.to_string()));
            };
            let (raw_name, after_close) = after_open.split_at(end);
            let name = raw_name.trim();
            if name.is_empty()
                || !name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            {
                return Err(TemplateError::Malformed(format!("{{{{{raw_name}}}}}")));
            }
            let value = self
                .get(name)
                .ok_or_else(|| TemplateError::Undefined(name.to_string()))?;
            out.push_str(value);
            rest = after_close.get(2..).unwrap_or_default();
        }
        out.push_str(rest);
        Ok(out)
    }

    /// Expand `input` on behalf of entry `id`, mapping failures to
    /// [`ValidationError`].
    ///
    /// # Errors
    ///
    /// See [`Vars::expand`].
    pub fn expand_for(&self, id: &str, input: &str) -> Result<String, ValidationError> {
        self.expand(input).map_err(|e| match e {
            TemplateError::Undefined(name) => ValidationError::UndefinedVariable {
                id: id.to_string(),
                name,
            },
            TemplateError::Malformed(fragment) => ValidationError::InvalidField {
                id: id.to_string(),
                message: format!("malformed placeholder '{fragment}'"),
            },
        })
    }
}

/// Parse a `--var key=value` argument.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidVariable`] if there is no `=` or the key
/// is empty.
///
/// # Examples
///
/// ```
/// use provision_cli::config::template::parse_var;
///
/// assert_eq!(
///     parse_var("hostname=fedora-x1").unwrap(),
///     ("hostname".to_string(), "fedora-x1".to_string())
/// );
/// assert!(parse_var("novalue").is_err());
/// ```
pub fn parse_var(arg: &str) -> Result<(String, String), ValidationError> {
    match arg.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(ValidationError::InvalidVariable(arg.to_string())),
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    fn vars() -> Vars {
        Vars::new().layer([("user", "cameron"), ("fedora_version", "40")])
    }

    #[test]
    fn plain_text_is_unchanged() {
        assert_eq!(vars().expand("no placeholders").unwrap(), "no placeholders");
    }

    #[test]
    fn multiple_placeholders() {
        assert_eq!(
            vars().expand("/home/{{user}}/f{{ fedora_version }}").unwrap(),
            "/home/cameron/f40"
        );
    }

    #[test]
    fn undefined_variable() {
        assert_eq!(
            vars().expand("{{ missing }}"),
            Err(TemplateError::Undefined("missing".to_string()))
        );
    }

    #[test]
    fn unterminated_placeholder() {
        assert!(matches!(
            vars().expand("value {{ user"),
            Err(TemplateError::Malformed(_))
        ));
    }

    #[test]
    fn empty_placeholder() {
        assert!(matches!(
            vars().expand("{{ }}"),
            Err(TemplateError::Malformed(_))
        ));
    }

    #[test]
    fn later_layers_win() {
        let v = Vars::new().layer([("a", "1")]).layer([("a", "2")]);
        assert_eq!(v.get("a"), Some("2"));
    }

    #[test]
    fn expand_for_maps_undefined_to_validation_error() {
        let err = vars().expand_for("motd", "{{ nope }}").unwrap_err();
        assert!(matches!(
            err,
            ValidationError::UndefinedVariable { ref id, ref name } if id == "motd" && name == "nope"
        ));
    }

    #[test]
    fn parse_var_keeps_equals_in_value() {
        assert_eq!(
            parse_var("opts=a=b").unwrap(),
            ("opts".to_string(), "a=b".to_string())
        );
    }

    #[test]
    fn parse_var_rejects_empty_key() {
        assert!(parse_var("=value").is_err());
    }
}
