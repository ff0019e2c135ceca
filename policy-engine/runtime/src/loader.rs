use anyhow::{bail, Context, Result};
use mesh_policy_k8s_api::{decode_documents, Document};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

const EXTENSIONS: [&str; 3] = ["yaml", "yml", "json"];

/// Reads every configuration document from a set of files and directories.
///
/// Directories are read non-recursively, in file name order; only YAML and JSON files are
/// considered and dotfiles are skipped. Every file that fails to load is reported.
pub fn load(paths: &[PathBuf]) -> Result<Vec<Document>> {
    let mut docs = Vec::new();
    let mut errors = Vec::new();
    for file in files(paths)? {
        match load_file(&file) {
            Ok(file_docs) => {
                debug!(path = %file.display(), documents = file_docs.len(), "loaded");
                docs.extend(file_docs);
            }
            Err(error) => {
                warn!(path = %file.display(), error = %format_args!("{error:#}"), "failed to load");
                errors.push(format!("{}: {error:#}", file.display()));
            }
        }
    }

    if !errors.is_empty() {
        bail!(
            "failed to load {} file(s):\n  {}",
            errors.len(),
            errors.join("\n  ")
        );
    }
    Ok(docs)
}

pub fn load_file(path: &Path) -> Result<Vec<Document>> {
    let yaml = fs::read_to_string(path).context("reading")?;
    let docs = decode_documents(&yaml)?;
    Ok(docs)
}

/// Lists the configuration files named by `paths`.
pub fn files(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        let meta = fs::metadata(path).with_context(|| format!("{}", path.display()))?;
        if !meta.is_dir() {
            files.push(path.clone());
            continue;
        }

        let mut entries = fs::read_dir(path)
            .with_context(|| format!("{}", path.display()))?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("{}", path.display()))?;
        entries.sort();
        files.extend(
            entries
                .into_iter()
                .filter(|p| p.is_file() && is_config_file(p)),
        );
    }
    Ok(files)
}

/// Returns true if a file in a configuration directory would be loaded.
pub fn is_config_file(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|n| n.to_str())
        .map_or(true, |n| n.starts_with('.'));
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    !hidden && ext.map_or(false, |e| EXTENSIONS.contains(&e.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SERVICE_ENTRY: &str = r#"
apiVersion: networking.istio.io/v1
kind: ServiceEntry
metadata:
  name: httpbin
  namespace: egress
spec:
  hosts: [httpbin.org]
  ports:
  - {number: 80, name: http}
  resolution: DNS
"#;

    const TWO_DOCUMENTS: &str = r#"
apiVersion: networking.istio.io/v1
kind: Sidecar
metadata:
  name: default
  namespace: istio-system
spec:
  outboundTrafficPolicy: {mode: REGISTRY_ONLY}
---
apiVersion: networking.istio.io/v1
kind: EnvoyFilter
metadata:
  name: lua
  namespace: istio-system
spec: {}
"#;

    #[test]
    fn loads_directories_in_order() {
        let dir = TempDir::new().expect("create tempdir");
        fs::write(dir.path().join("b.yaml"), TWO_DOCUMENTS).unwrap();
        fs::write(dir.path().join("a.yml"), SERVICE_ENTRY).unwrap();
        fs::write(dir.path().join(".hidden.yaml"), "not: [valid").unwrap();
        fs::write(dir.path().join("README.md"), "# notes").unwrap();
        fs::create_dir(dir.path().join("nested.yaml")).unwrap();

        let files = files(&[dir.path().to_path_buf()]).unwrap();
        assert_eq!(
            files,
            vec![dir.path().join("a.yml"), dir.path().join("b.yaml")]
        );

        let docs = load(&[dir.path().to_path_buf()]).unwrap();
        assert_eq!(docs.len(), 3);
        assert!(matches!(docs[0], Document::ServiceEntry(_)));
        assert!(matches!(docs[1], Document::Sidecar(_)));
        assert!(matches!(docs[2], Document::Ignored(_)));
    }

    #[test]
    fn loads_files_and_directories() {
        let dir = TempDir::new().expect("create tempdir");
        let file = dir.path().join("extra.txt");
        fs::write(&file, SERVICE_ENTRY).unwrap();
        let sub = dir.path().join("conf.d");
        fs::create_dir(&sub).unwrap();
        fs::write(sub.join("sidecar.yaml"), TWO_DOCUMENTS).unwrap();

        // Files named explicitly are loaded whatever their extension.
        let docs = load(&[file, sub]).unwrap();
        assert_eq!(docs.len(), 3);
    }

    #[test]
    fn reports_every_failed_file() {
        let dir = TempDir::new().expect("create tempdir");
        fs::write(dir.path().join("a.yaml"), "kind: [").unwrap();
        fs::write(dir.path().join("b.yaml"), SERVICE_ENTRY).unwrap();
        fs::write(dir.path().join("c.yaml"), "metadata: {name: x}").unwrap();

        let err = load(&[dir.path().to_path_buf()]).expect_err("files are invalid");
        let msg = format!("{err:#}");
        assert!(msg.starts_with("failed to load 2 file(s)"), "{msg}");
        assert!(msg.contains("a.yaml"), "{msg}");
        assert!(msg.contains("c.yaml"), "{msg}");
        assert!(!msg.contains("b.yaml"), "{msg}");
    }

    #[test]
    fn missing_paths_are_errors() {
        let dir = TempDir::new().expect("create tempdir");
        let missing = dir.path().join("missing");
        assert!(load(&[missing]).is_err());
    }

    #[test]
    fn config_files() {
        assert!(is_config_file(Path::new("/etc/mesh/vs.yaml")));
        assert!(is_config_file(Path::new("/etc/mesh/vs.YML")));
        assert!(is_config_file(Path::new("vs.json")));
        assert!(!is_config_file(Path::new("/etc/mesh/.vs.yaml.swp")));
        assert!(!is_config_file(Path::new("/etc/mesh/.vs.yaml")));
        assert!(!is_config_file(Path::new("/etc/mesh/vs.yaml~")));
        assert!(!is_config_file(Path::new("/etc/mesh/notes")));
    }
}
