use std::{
    fs, io,
    path::{Path, PathBuf},
};

use walkdir::WalkDir;

/// Which hot-reload strategy a project uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectKind {
    /// XAML UI: edits are re-sent as concatenated source
    Markup,
    /// Plain code: edits are compiled into deltas
    Compiled,
}

impl ProjectKind {
    /// Inspect a project file (or the directory containing one).
    ///
    /// A project is markup based when its project file references a XAML
    /// package or any `*.xaml` file sits in its source tree.
    pub fn detect(project_path: &Path) -> io::Result<Self> {
        let dir = project_dir(project_path);
        let project_files: Vec<PathBuf> = if project_path.is_file() {
            vec![project_path.to_path_buf()]
        } else {
            fs::read_dir(&dir)?
                .filter_map(Result::ok)
                .map(|entry| entry.path())
                .filter(|path| has_extension(path, "csproj"))
                .collect()
        };

        for file in &project_files {
            if fs::read_to_string(file)?.contains("Xaml") {
                return Ok(ProjectKind::Markup);
            }
        }

        let has_markup = WalkDir::new(&dir)
            .into_iter()
            .filter_entry(|entry| {
                let name = entry.file_name();
                entry.depth() == 0 || (name != "bin" && name != "obj")
            })
            .filter_map(Result::ok)
            .any(|entry| entry.file_type().is_file() && has_extension(entry.path(), "xaml"));

        Ok(if has_markup {
            ProjectKind::Markup
        } else {
            ProjectKind::Compiled
        })
    }
}

/// Directory holding the project; a project file resolves to its parent
pub fn project_dir(project_path: &Path) -> PathBuf {
    if project_path.is_dir() {
        return project_path.to_path_buf();
    }
    project_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(extension))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAIN_PROJECT: &str = r#"<Project Sdk="Tizen.NET.Sdk/1.1.9">
  <PropertyGroup>
    <TargetFramework>net6.0-tizen</TargetFramework>
  </PropertyGroup>
</Project>"#;

    #[test]
    fn plain_project_is_compiled() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("App.csproj"), PLAIN_PROJECT).unwrap();
        fs::write(dir.path().join("App.cs"), "class App {}").unwrap();
        assert_eq!(ProjectKind::detect(dir.path()).unwrap(), ProjectKind::Compiled);
    }

    #[test]
    fn xaml_package_reference_is_markup() {
        let dir = tempfile::tempdir().unwrap();
        let csproj = dir.path().join("App.csproj");
        fs::write(
            &csproj,
            r#"<Project><ItemGroup><PackageReference Include="Tizen.NUI.XamlBuild" Version="1.0.11" /></ItemGroup></Project>"#,
        )
        .unwrap();
        assert_eq!(ProjectKind::detect(&csproj).unwrap(), ProjectKind::Markup);
    }

    #[test]
    fn xaml_file_in_tree_is_markup() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("App.csproj"), PLAIN_PROJECT).unwrap();
        fs::create_dir_all(dir.path().join("Views")).unwrap();
        fs::write(dir.path().join("Views/MainPage.xaml"), "<ContentPage/>").unwrap();
        assert_eq!(ProjectKind::detect(dir.path()).unwrap(), ProjectKind::Markup);
    }

    #[test]
    fn build_output_is_not_scanned() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("App.csproj"), PLAIN_PROJECT).unwrap();
        fs::create_dir_all(dir.path().join("obj/Debug")).unwrap();
        fs::write(dir.path().join("obj/Debug/Stale.xaml"), "").unwrap();
        assert_eq!(ProjectKind::detect(dir.path()).unwrap(), ProjectKind::Compiled);
    }

    #[test]
    fn project_file_resolves_to_parent() {
        let dir = tempfile::tempdir().unwrap();
        let csproj = dir.path().join("App.csproj");
        fs::write(&csproj, PLAIN_PROJECT).unwrap();
        assert_eq!(project_dir(&csproj), dir.path());
        assert_eq!(project_dir(dir.path()), dir.path());
    }
}
