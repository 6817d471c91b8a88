//! Markup hot reload: the edited XAML file, its generated partial class and
//! its code-behind are concatenated into one payload the device-side agent
//! re-parses.

use std::{
    fs, io,
    path::{Path, PathBuf},
    time::SystemTime,
};

use regex::Regex;
use tempfile::TempDir;
use walkdir::WalkDir;

/// Source attribute the XAML generator stamps on generated classes
const FILE_PATH_ATTRIBUTE: &str =
    r#"\[\s*global::[\w.]+\.XamlFilePath(?:Attribute)?\("[^"]*"\)\s*\]"#;

/// How a saved file is hot reloaded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// `*.xaml` or its `*.xaml.cs` code-behind
    Markup,
    /// Any other `*.cs` source
    Code,
    Ignored,
}

pub fn classify(path: &Path) -> ChangeKind {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return ChangeKind::Ignored;
    };
    let name = name.to_ascii_lowercase();
    if name.ends_with(".g.cs") {
        ChangeKind::Ignored
    } else if name.ends_with(".xaml") || name.ends_with(".xaml.cs") {
        ChangeKind::Markup
    } else if name.ends_with(".cs") {
        ChangeKind::Code
    } else {
        ChangeKind::Ignored
    }
}

/// The files that make up one markup payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkupSet {
    pub primary: PathBuf,
    pub generated: Option<PathBuf>,
    pub code_behind: Option<PathBuf>,
}

/// Find the markup file behind `changed` plus its generated and code-behind
/// companions anywhere under `root`.
///
/// When several companions share a name the most recently written one wins;
/// equal timestamps fall back to the lexicographically smallest path.
pub fn resolve_markup_set(changed: &Path, root: &Path) -> io::Result<MarkupSet> {
    let name = changed
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| invalid_name(changed))?;
    let markup_name = if name.to_ascii_lowercase().ends_with(".xaml.cs") {
        &name[..name.len() - ".cs".len()]
    } else {
        name
    };

    let primary = changed.with_file_name(markup_name);
    if !primary.is_file() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("markup file {} not found", primary.display()),
        ));
    }

    Ok(MarkupSet {
        generated: newest_named(root, &format!("{markup_name}.g.cs"))?,
        code_behind: newest_named(root, &format!("{markup_name}.cs"))?,
        primary,
    })
}

fn invalid_name(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("{} has no usable file name", path.display()),
    )
}

fn newest_named(root: &Path, file_name: &str) -> io::Result<Option<PathBuf>> {
    let mut best: Option<(SystemTime, PathBuf)> = None;
    for entry in WalkDir::new(root).into_iter().filter_map(|entry| {
        entry
            .map_err(|e| tracing::trace!(error = %e, "skipping unreadable entry"))
            .ok()
    }) {
        if !entry.file_type().is_file() || entry.file_name() != file_name {
            continue;
        }
        let modified = entry.metadata().map_err(io::Error::from)?.modified()?;
        let path = entry.into_path();
        best = match best {
            Some((t, p)) if t > modified || (t == modified && p <= path) => Some((t, p)),
            _ => Some((modified, path)),
        };
    }
    Ok(best.map(|(_, path)| path))
}

/// Concatenated payload on local disk, removed on drop
#[derive(Debug)]
pub struct MarkupPayload {
    _dir: TempDir,
    file: PathBuf,
}

impl MarkupPayload {
    pub fn path(&self) -> &Path {
        &self.file
    }
}

#[derive(Debug, Clone)]
pub struct MarkupReloader {
    file_path_attribute: Regex,
}

impl MarkupReloader {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            file_path_attribute: Regex::new(FILE_PATH_ATTRIBUTE)?,
        })
    }

    pub fn strip_generated(&self, text: &str) -> String {
        self.file_path_attribute.replace_all(text, "").into_owned()
    }

    /// Join the set as `// SOURCE: <file name>` sections: markup, generated, code-behind
    pub fn render(&self, set: &MarkupSet) -> io::Result<String> {
        let mut out = String::new();
        append_source(&mut out, &set.primary, &fs::read_to_string(&set.primary)?);
        if let Some(generated) = &set.generated {
            let text = self.strip_generated(&fs::read_to_string(generated)?);
            append_source(&mut out, generated, &text);
        }
        if let Some(code_behind) = &set.code_behind {
            append_source(&mut out, code_behind, &fs::read_to_string(code_behind)?);
        }
        Ok(out)
    }

    /// Resolve, render and write the payload for a changed markup file.
    ///
    /// The payload keeps the markup file's name so the device can match it
    /// to the loaded page.
    pub fn prepare(&self, changed: &Path, root: &Path) -> io::Result<MarkupPayload> {
        let set = resolve_markup_set(changed, root)?;
        let text = self.render(&set)?;
        let file_name = set
            .primary
            .file_name()
            .ok_or_else(|| invalid_name(&set.primary))?;

        let dir = tempfile::Builder::new()
            .prefix("tizen-hotreload")
            .tempdir()?;
        let file = dir.path().join(file_name);
        fs::write(&file, text)?;
        tracing::debug!(payload = %file.display(), ?set, "prepared markup payload");
        Ok(MarkupPayload { _dir: dir, file })
    }
}

fn append_source(out: &mut String, path: &Path, text: &str) {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_default();
    out.push_str("// SOURCE: ");
    out.push_str(&name);
    out.push('\n');
    out.push_str(text);
    out.push('\n');
}
