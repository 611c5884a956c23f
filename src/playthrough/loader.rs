//! Playthrough file loading

use std::path::{Path, PathBuf};

use super::Playthrough;
use crate::common::{Error, Result};

/// Load a playthrough file
///
/// Relative host paths of artifacts are resolved against the directory
/// holding the file.
pub fn load(path: &Path) -> Result<Playthrough> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        tracing::debug!(path = %path.display(), error = %e, "cannot read playthrough");
        Error::PlaythroughNotFound {
            path: path.to_path_buf(),
        }
    })?;

    let mut playthrough = parse_at(path, &content)?;

    let base = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    for act in &mut playthrough.acts {
        for artifact in act.input.iter_mut().chain(act.output.iter_mut()) {
            artifact.resolve_host_path(&base);
        }
    }

    tracing::debug!(
        path = %path.display(),
        name = %playthrough.name,
        acts = playthrough.acts.len(),
        "loaded playthrough"
    );
    Ok(playthrough)
}

/// Parse a playthrough from YAML text
pub fn parse(content: &str) -> Result<Playthrough> {
    parse_at(Path::new("<inline>"), content)
}

fn parse_at(path: &Path, content: &str) -> Result<Playthrough> {
    serde_yaml::from_str(content).map_err(|e| Error::load(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactSource;
    use std::fs;
    use tempfile::TempDir;

    const TWO_ACTS: &str = r#"
name: handoff
acts:
  zeta:
    name: Build
    run-on: ubuntu:22.04
    keep-alive: true
    input:
      - host-path: fixtures/data.txt
        path: /root/data.txt
    output:
      - key: build
        path: /root/out
    scenes:
      - name: compile
        run: make
  alpha:
    run-on: zeta
    input:
      - key: build
        path: /srv/out
    scenes:
      - name: serve
        run: ./serve
      - name: check
        run: curl localhost
"#;

    #[test]
    fn test_acts_keep_declaration_order() {
        let playthrough = parse(TWO_ACTS).unwrap();
        let ids: Vec<&str> = playthrough.acts.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["zeta", "alpha"]);

        let build = &playthrough.acts[0];
        assert_eq!(build.name, "Build");
        assert!(build.keep_alive);
        assert_eq!(build.output[0].key.as_deref(), Some("build"));

        let scenes: Vec<&str> = playthrough.acts[1]
            .scenes
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(scenes, vec!["serve", "check"]);
    }

    #[test]
    fn test_many_acts_keep_order() {
        let mut yaml = String::from("name: many\nacts:\n");
        let ids: Vec<String> = (0..40).rev().map(|i| format!("act{i:02}")).collect();
        for id in &ids {
            yaml.push_str(&format!("  {id}:\n    run-on: img\n"));
        }

        let playthrough = parse(&yaml).unwrap();
        let loaded: Vec<String> = playthrough.acts.into_iter().map(|a| a.id).collect();
        assert_eq!(loaded, ids);
    }

    #[test]
    fn test_acts_as_sequence_is_rejected() {
        let err = parse("name: x\nacts:\n  - run-on: img\n").unwrap_err();
        assert!(matches!(err, Error::Load { .. }));
        assert!(err.to_string().contains("a mapping of act ids to acts"));
    }

    #[test]
    fn test_duplicate_act_ids_are_rejected() {
        let err = parse("name: x\nacts:\n  a:\n    run-on: img\n  a:\n    run-on: img\n")
            .unwrap_err();
        assert!(matches!(err, Error::Load { .. }));
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_missing_run_on_is_rejected() {
        let err = parse("name: x\nacts:\n  a:\n    keep-alive: true\n").unwrap_err();
        assert!(err.to_string().contains("run-on"));
    }

    #[test]
    fn test_ambiguous_artifact_loads() {
        let playthrough = parse(
            "name: x\nacts:\n  a:\n    run-on: img\n    input:\n      - key: k\n        host-path: h\n        path: /p\n",
        )
        .unwrap();
        assert!(matches!(
            playthrough.acts[0].input[0].source(),
            Err(Error::AmbiguousArtifact { .. })
        ));
    }

    #[test]
    fn test_load_resolves_host_paths() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("play.yaml");
        fs::write(&file, TWO_ACTS).unwrap();

        let playthrough = load(&file).unwrap();
        let input = &playthrough.acts[0].input[0];
        assert_eq!(
            input.source().unwrap(),
            ArtifactSource::Host(&dir.path().join("fixtures/data.txt"))
        );
        // Cache artifacts are untouched
        assert_eq!(
            playthrough.acts[1].input[0].source().unwrap(),
            ArtifactSource::Cache("build")
        );
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = load(&dir.path().join("absent.yaml")).unwrap_err();
        assert!(matches!(err, Error::PlaythroughNotFound { .. }));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_load_malformed_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("bad.yaml");
        fs::write(&file, "name: [unclosed\n").unwrap();

        let err = load(&file).unwrap_err();
        assert!(matches!(err, Error::Load { ref path, .. } if path == &file));
        assert_eq!(err.exit_code(), 1);
    }
}
