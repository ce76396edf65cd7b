//! Lossless Architect manifest document
//!
//! The `.arc` format is line oriented: a line starting with `@` opens a
//! section, the lines that follow are its values, and `#` starts a comment.
//! The document keeps every line verbatim (including its terminator) so that
//! sections which are not edited render back byte-for-byte.

use crate::error::ManifestError;
use crate::Result;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Manifest file names, in lookup order.
pub const MANIFEST_FILE_NAMES: [&str; 2] = ["app.arc", ".arc"];

/// Section holding the application name.
pub const APP_SECTION: &str = "app";

/// One `@section` and the raw lines that belong to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    name: String,
    header: String,
    lines: Vec<String>,
}

impl Section {
    /// Section name without the leading `@`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Value entries (comments and blank lines skipped, inline comments
    /// stripped, surrounding whitespace trimmed).
    pub fn values(&self) -> Vec<&str> {
        self.lines.iter().filter_map(|line| value_of(line)).collect()
    }

    fn first_value_index(&self) -> Option<usize> {
        self.lines.iter().position(|line| value_of(line).is_some())
    }
}

/// Parsed manifest. Renders back to exactly the text it was parsed from
/// until a mutation is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArcManifest {
    preamble: Vec<String>,
    sections: Vec<Section>,
}

impl ArcManifest {
    /// Parse manifest text. Parsing never fails: unknown content is kept as-is.
    pub fn parse(text: &str) -> Self {
        let mut preamble = Vec::new();
        let mut sections: Vec<Section> = Vec::new();

        for line in text.split_inclusive('\n') {
            if let Some(name) = section_name(line) {
                sections.push(Section {
                    name,
                    header: line.to_string(),
                    lines: Vec::new(),
                });
                continue;
            }
            match sections.last_mut() {
                Some(section) => section.lines.push(line.to_string()),
                None => preamble.push(line.to_string()),
            }
        }

        Self { preamble, sections }
    }

    /// All sections in document order.
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// First section with the given name.
    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// Current application name, if declared.
    pub fn app_name(&self) -> Option<&str> {
        self.section(APP_SECTION)
            .and_then(|s| s.values().into_iter().next())
    }

    /// Make `app_name` the single value of the `@app` section.
    ///
    /// Any previous value is overwritten and additional values are dropped;
    /// comments and blank lines in the section stay where they are. When the
    /// manifest has no `@app` section one is inserted at the top. Every other
    /// section is left untouched, so applying the same name twice yields the
    /// same document as applying it once.
    pub fn set_app_name(&mut self, app_name: &str) -> Result<()> {
        validate_app_name(app_name)?;

        let Some(position) = self.sections.iter().position(|s| s.name == APP_SECTION) else {
            self.sections.insert(
                0,
                Section {
                    name: APP_SECTION.to_string(),
                    header: format!("@{APP_SECTION}\n"),
                    lines: vec![format!("{app_name}\n"), "\n".to_string()],
                },
            );
            return Ok(());
        };

        let section = &mut self.sections[position];
        match section.first_value_index() {
            Some(first) => {
                let terminator = line_terminator(&section.lines[first]).to_string();
                section.lines[first] = format!("{app_name}{terminator}");
                let mut index = 0;
                section.lines.retain(|line| {
                    let keep = index == first || value_of(line).is_none();
                    index += 1;
                    keep
                });
            }
            None => {
                if !section.header.ends_with('\n') {
                    section.header.push('\n');
                }
                section.lines.insert(0, format!("{app_name}\n"));
            }
        }

        Ok(())
    }

    /// Render the manifest back to text.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.preamble {
            out.push_str(line);
        }
        for section in &self.sections {
            out.push_str(&section.header);
            for line in &section.lines {
                out.push_str(line);
            }
        }
        out
    }
}

impl fmt::Display for ArcManifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Find the manifest file of a project.
pub fn locate(project_dir: &Path) -> Result<PathBuf> {
    MANIFEST_FILE_NAMES
        .iter()
        .map(|name| project_dir.join(name))
        .find(|path| path.is_file())
        .ok_or_else(|| ManifestError::NotFound(project_dir.to_path_buf()))
}

/// Read and parse a manifest file.
pub fn read(path: &Path) -> Result<ArcManifest> {
    let bytes = std::fs::read(path)?;
    let text = String::from_utf8(bytes).map_err(|_| ManifestError::Encoding(path.to_path_buf()))?;
    Ok(ArcManifest::parse(&text))
}

/// Rewrite the `@app` section of the manifest at `path` in place.
///
/// The new content is written to a temporary file next to the manifest and
/// renamed over it, so readers never observe a partially written manifest.
pub fn set_app_name(path: &Path, app_name: &str) -> Result<()> {
    let mut manifest = read(path)?;
    let previous = manifest.app_name().map(str::to_string);
    manifest.set_app_name(app_name)?;

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(manifest.render().as_bytes())?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| ManifestError::Persist {
        path: path.to_path_buf(),
        source: e.error,
    })?;

    debug!(
        manifest = %path.display(),
        previous = previous.as_deref().unwrap_or("<none>"),
        app = app_name,
        "Rewrote @app section"
    );
    Ok(())
}

fn validate_app_name(app_name: &str) -> Result<()> {
    let invalid = app_name.is_empty()
        || app_name.starts_with('@')
        || app_name.chars().any(|c| c.is_whitespace() || c == '#');
    if invalid {
        return Err(ManifestError::InvalidAppName(app_name.to_string()));
    }
    Ok(())
}

/// Headers start in column 0. An indented `@...` line is a value of the
/// enclosing section.
fn section_name(line: &str) -> Option<String> {
    let rest = line.strip_prefix('@')?;
    let name: String = rest
        .chars()
        .take_while(|c| !c.is_whitespace() && *c != '#')
        .collect();
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

fn value_of(line: &str) -> Option<&str> {
    let content = match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    };
    let trimmed = content.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn line_terminator(line: &str) -> &str {
    if line.ends_with("\r\n") {
        "\r\n"
    } else if line.ends_with('\n') {
        "\n"
    } else {
        ""
    }
}
