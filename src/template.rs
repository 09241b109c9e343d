//! Template rendering. Keyword substitution runs first, then recursive file inclusion.
//!
//! Keywords are `$` followed by an attribute name in uppercase, e.g.
//! `$FIRSTNAME` for the attribute `firstname`. After substitution, any line
//! starting with `++` is replaced by the contents of the file named by the
//! rest of the line. Included files are expanded for `++` lines too, but
//! are never keyword-substituted, so a template can pick which file to
//! include from addressee attributes while fragments stay verbatim.

use std::path::{Path, PathBuf};

use crate::directory::Attributes;
use crate::error::TemplateError;

/// Line prefix marking a file inclusion.
pub const INCLUDE_MARKER: &str = "++";

/// Maximum nesting of included files.
pub const MAX_INCLUDE_DEPTH: usize = 32;

/// Replace every `$NAME` token with the value of attribute `name`.
///
/// Attributes are applied in record order and values are inserted as-is.
/// Tokens with no matching attribute are left in place.
pub fn substitute(text: &str, attrs: &Attributes) -> String {
    let mut out = text.to_string();
    for (name, value) in attrs.iter() {
        if name.is_empty() {
            continue;
        }
        let token = format!("${}", name.to_uppercase());
        out = out.replace(&token, value);
    }
    out
}

/// Renders message templates for one addressee at a time.
#[derive(Debug, Clone, Default)]
pub struct Renderer {
    include_dir: Option<PathBuf>,
}

impl Renderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative inclusion paths against `dir` instead of the
    /// working directory.
    pub fn with_include_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.include_dir = Some(dir.into());
        self
    }

    /// Render `template` for one addressee.
    ///
    /// Every output line ends with `\n`. Fails if an included file is
    /// missing or the inclusions form a cycle.
    pub fn render(&self, template: &str, attrs: &Attributes) -> Result<String, TemplateError> {
        let substituted = substitute(template, attrs);
        let mut out = String::with_capacity(substituted.len());
        let mut stack = Vec::new();
        self.expand(&substituted, &mut out, &mut stack)?;
        Ok(out)
    }

    fn resolve(&self, raw: &str) -> PathBuf {
        match &self.include_dir {
            Some(dir) => dir.join(raw),
            None => PathBuf::from(raw),
        }
    }

    fn expand(
        &self,
        text: &str,
        out: &mut String,
        stack: &mut Vec<PathBuf>,
    ) -> Result<(), TemplateError> {
        for line in text.lines() {
            match line.strip_prefix(INCLUDE_MARKER) {
                Some(rest) => self.include(&self.resolve(rest.trim_end()), out, stack)?,
                None => {
                    out.push_str(line);
                    out.push('\n');
                }
            }
        }
        Ok(())
    }

    fn include(
        &self,
        path: &Path,
        out: &mut String,
        stack: &mut Vec<PathBuf>,
    ) -> Result<(), TemplateError> {
        let canonical = path.canonicalize().map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                TemplateError::IncludeNotFound {
                    path: path.to_path_buf(),
                }
            } else {
                TemplateError::IncludeRead {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;

        if stack.contains(&canonical) {
            return Err(TemplateError::CyclicInclusion { path: canonical });
        }
        if stack.len() >= MAX_INCLUDE_DEPTH {
            return Err(TemplateError::TooDeep {
                path: canonical,
                limit: MAX_INCLUDE_DEPTH,
            });
        }

        let content =
            std::fs::read_to_string(&canonical).map_err(|source| TemplateError::IncludeRead {
                path: canonical.clone(),
                source,
            })?;

        tracing::trace!(path = %canonical.display(), "Including file");
        stack.push(canonical);
        self.expand(&content, out, stack)?;
        stack.pop();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn attrs(pairs: &[(&str, &str)]) -> Attributes {
        pairs.iter().copied().collect()
    }

    #[test]
    fn substitutes_uppercase_tokens_everywhere() {
        let a = attrs(&[("email", "a@x.com"), ("firstname", "Ann")]);
        let text = "To: $EMAIL\nSubject: Hi $FIRSTNAME\nBody:\nDear $FIRSTNAME,\n";
        assert_eq!(
            substitute(text, &a),
            "To: a@x.com\nSubject: Hi Ann\nBody:\nDear Ann,\n"
        );
    }

    #[test]
    fn substitution_is_case_sensitive() {
        let a = attrs(&[("firstname", "Ann")]);
        assert_eq!(substitute("$firstname $Firstname $FIRSTNAME", &a), "$firstname $Firstname Ann");
    }

    #[test]
    fn unknown_tokens_pass_through() {
        let a = attrs(&[("firstname", "Ann")]);
        assert_eq!(substitute("Hi $FIRSTNAME from $CITY", &a), "Hi Ann from $CITY");
    }

    #[test]
    fn values_are_inserted_verbatim() {
        let a = attrs(&[("note", r"a\1 $& \n")]);
        assert_eq!(substitute("[$NOTE]", &a), r"[a\1 $& \n]");
    }

    #[test]
    fn render_is_idempotent() {
        let r = Renderer::new();
        let a = attrs(&[("firstname", "Ann")]);
        let t = "Subject: Hi $FIRSTNAME\nBody:\nText\n";
        assert_eq!(r.render(t, &a).unwrap(), r.render(t, &a).unwrap());
    }

    #[test]
    fn render_terminates_every_line() {
        let r = Renderer::new();
        let out = r.render("To: x\nBody:\nlast line", &Attributes::new()).unwrap();
        assert_eq!(out, "To: x\nBody:\nlast line\n");
    }

    #[test]
    fn nested_inclusion_splices_in_place_once() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "A start\n++b.txt\nA end\n").unwrap();
        std::fs::write(dir.path().join("b.txt"), "B content").unwrap();

        let r = Renderer::new().with_include_dir(dir.path());
        let out = r.render("before\n++a.txt\nafter\n", &Attributes::new()).unwrap();
        assert_eq!(out, "before\nA start\nB content\nA end\nafter\n");
        assert_eq!(out.matches("B content").count(), 1);
    }

    #[test]
    fn included_content_is_not_substituted() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("sig.txt"), "Regards $FIRSTNAME\n").unwrap();

        let r = Renderer::new().with_include_dir(dir.path());
        let out = r
            .render("Hi $FIRSTNAME\n++sig.txt\n", &attrs(&[("firstname", "Ann")]))
            .unwrap();
        assert_eq!(out, "Hi Ann\nRegards $FIRSTNAME\n");
    }

    #[test]
    fn inclusion_path_can_come_from_attributes() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("sig-fr.txt"), "Cordialement\n").unwrap();
        std::fs::write(dir.path().join("sig-en.txt"), "Regards\n").unwrap();

        let r = Renderer::new().with_include_dir(dir.path());
        let out = r.render("++sig-$LANG.txt\n", &attrs(&[("lang", "fr")])).unwrap();
        assert_eq!(out, "Cordialement\n");
    }

    #[test]
    fn missing_include_is_fatal() {
        let dir = TempDir::new().unwrap();
        let r = Renderer::new().with_include_dir(dir.path());
        let err = r.render("++missing.txt\n", &Attributes::new()).unwrap_err();
        assert!(matches!(err, TemplateError::IncludeNotFound { .. }));
    }

    #[test]
    fn cyclic_include_fails_instead_of_hanging() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "++b.txt\n").unwrap();
        std::fs::write(dir.path().join("b.txt"), "++a.txt\n").unwrap();

        let r = Renderer::new().with_include_dir(dir.path());
        let err = r.render("++a.txt\n", &Attributes::new()).unwrap_err();
        assert!(matches!(err, TemplateError::CyclicInclusion { .. }));
    }

    #[test]
    fn self_include_is_cyclic() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("loop.txt"), "x\n++loop.txt\n").unwrap();

        let r = Renderer::new().with_include_dir(dir.path());
        assert!(matches!(
            r.render("++loop.txt", &Attributes::new()),
            Err(TemplateError::CyclicInclusion { .. })
        ));
    }

    #[test]
    fn same_file_may_be_included_twice_in_sequence() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("hr.txt"), "----\n").unwrap();

        let r = Renderer::new().with_include_dir(dir.path());
        let out = r.render("++hr.txt\nmiddle\n++hr.txt\n", &Attributes::new()).unwrap();
        assert_eq!(out, "----\nmiddle\n----\n");
    }
}
