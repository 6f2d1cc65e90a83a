//! Integration tests for whole-graph builds: output tree, manifest,
//! content-hash versioning and error traces.

use anyhow::Result;
use std::sync::Arc;

use kiln::config::KilnConfig;
use kiln::graph::UrlGraph;
use kiln::kitchen::Kitchen;
use kiln::plugin::{Phase, PluginController, fs::FileSystemPlugin};

mod common;
use common::ImportScanner;

struct BuildProject {
    dir: tempfile::TempDir,
}

impl BuildProject {
    fn new(files: &[(&str, &str)]) -> Result<Self> {
        common::init_tracing();
        let dir = tempfile::tempdir()?;
        for (path, content) in files {
            let path = dir.path().join(path);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, content)?;
        }
        Ok(Self { dir })
    }

    fn kitchen(&self, versioning: bool) -> Kitchen {
        let config = KilnConfig {
            root_dir: self.dir.path().to_path_buf(),
            out_dir: self.dir.path().join("dist"),
            versioning,
            ..KilnConfig::default()
        };
        let mut plugins = PluginController::new();
        plugins.register(Arc::new(FileSystemPlugin::new(self.dir.path())), 0);
        plugins.register(Arc::new(ImportScanner), 0);
        Kitchen::new(Arc::new(UrlGraph::new()), Arc::new(plugins), Phase::Build, config)
    }
}

#[tokio::test]
async fn test_build_writes_versioned_outputs_and_manifest() -> Result<()> {
    let project = BuildProject::new(&[
        ("main.js", "import \"./style.css\";\nimport \"./util.js\";\nexport {}"),
        ("style.css", "body { margin: 0 }"),
        ("util.js", "export const util = true"),
    ])?;

    let output = project.kitchen(true).build(&["main.js"]).await?;

    // The entry keeps its name; its dependencies are hashed.
    assert_eq!(output.manifest["main.js"], "main.js");
    let style_hashed = &output.manifest["style.css"];
    assert_ne!(style_hashed, "style.css");
    assert!(style_hashed.starts_with("style-") && style_hashed.ends_with(".css"));

    // Every manifest target exists on disk, plus the manifest itself.
    for target in output.manifest.values() {
        assert!(output.out_dir.join(target).is_file(), "missing output {target}");
    }
    let manifest_path = output.out_dir.join("manifest.json");
    assert!(manifest_path.is_file());
    let manifest_json: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&manifest_path)?)?;
    assert_eq!(manifest_json["style.css"], *style_hashed);

    // The entry's content references the hashed filenames.
    let main = std::fs::read_to_string(output.out_dir.join("main.js"))?;
    assert!(main.contains(style_hashed.as_str()));
    assert!(main.contains(output.manifest["util.js"].as_str()));
    Ok(())
}

#[tokio::test]
async fn test_build_without_versioning_keeps_names() -> Result<()> {
    let project = BuildProject::new(&[
        ("main.js", "import \"./style.css\";\nexport {}"),
        ("style.css", "body { margin: 0 }"),
    ])?;

    let output = project.kitchen(false).build(&["main.js"]).await?;

    assert_eq!(output.manifest["style.css"], "style.css");
    let style = std::fs::read_to_string(output.out_dir.join("style.css"))?;
    assert_eq!(style, "body { margin: 0 }");
    Ok(())
}

#[tokio::test]
async fn test_rebuilding_unchanged_sources_is_deterministic() -> Result<()> {
    let files = [
        ("main.js", "import \"./style.css\";\nexport {}"),
        ("style.css", "body { margin: 0 }"),
    ];
    let first = BuildProject::new(&files)?;
    let second = BuildProject::new(&files)?;

    let a = first.kitchen(true).build(&["main.js"]).await?;
    let b = second.kitchen(true).build(&["main.js"]).await?;

    assert_eq!(a.manifest, b.manifest);
    Ok(())
}

#[tokio::test]
async fn test_failed_dependency_reports_the_import_trace() -> Result<()> {
    let project = BuildProject::new(&[("main.js", "import \"./missing.js\";\nexport {}")])?;

    let error = project.kitchen(true).build(&["main.js"]).await.unwrap_err();
    let rendered = format!("{error:#}");
    assert!(rendered.contains("imported by"), "no trace in: {rendered}");
    assert!(rendered.contains("missing.js"));
    assert!(rendered.contains("main.js"));
    Ok(())
}

#[tokio::test]
async fn test_nested_outputs_keep_their_directories() -> Result<()> {
    let project = BuildProject::new(&[
        ("main.js", "import \"./assets/theme.css\";\nexport {}"),
        ("assets/theme.css", ":root { --accent: teal }"),
    ])?;

    let output = project.kitchen(true).build(&["main.js"]).await?;

    let theme_hashed = &output.manifest["assets/theme.css"];
    assert!(theme_hashed.starts_with("assets/theme-"));
    assert!(output.out_dir.join(theme_hashed).is_file());
    Ok(())
}
