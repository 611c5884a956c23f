//! Playthrough configuration types
//!
//! A playthrough is read from YAML:
//! ```yaml
//! name: cluster smoke test
//! provider:
//!   lxd: {}
//! acts:
//!   server:
//!     run-on: ubuntu:22.04
//!     scenes:
//!       - name: install
//!         run: apt-get install -y nginx
//! ```
//! Acts run in the order they are declared in the `acts` mapping.

mod loader;

pub use loader::{load, parse};

use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

use crate::artifact::Artifact;

/// A complete playthrough
#[derive(Debug, Deserialize)]
pub struct Playthrough {
    /// Name of the playthrough
    pub name: String,

    /// Backend that provisions instances
    #[serde(default, deserialize_with = "select_provider")]
    pub provider: ProviderSpec,

    /// Acts in declaration order
    #[serde(deserialize_with = "ordered_acts")]
    pub acts: Vec<Act>,
}

/// One unit of work bound to one instance
#[derive(Debug, Clone, PartialEq)]
pub struct Act {
    /// Unique act id, also the name of any instance the act creates
    pub id: String,
    /// Human readable name, the id when not given
    pub name: String,
    /// Image alias to provision from, or the id of an existing instance
    pub run_on: String,
    /// Leave the instance running after the act
    pub keep_alive: bool,
    pub input: Vec<Artifact>,
    pub output: Vec<Artifact>,
    pub scenes: Vec<Scene>,
}

/// Body of an act as written under its id
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ActOptions {
    name: Option<String>,
    run_on: String,
    #[serde(default)]
    keep_alive: bool,
    #[serde(default)]
    input: Vec<Artifact>,
    #[serde(default)]
    output: Vec<Artifact>,
    #[serde(default)]
    scenes: Vec<Scene>,
}

impl ActOptions {
    fn into_act(self, id: String) -> Act {
        Act {
            name: self.name.unwrap_or_else(|| id.clone()),
            id,
            run_on: self.run_on,
            keep_alive: self.keep_alive,
            input: self.input,
            output: self.output,
            scenes: self.scenes,
        }
    }
}

/// A named shell script run inside an act's instance
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Scene {
    pub name: String,
    pub run: String,
}

/// Supported instance backends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProviderKind {
    #[default]
    Lxd,
}

impl ProviderKind {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "lxd" => Some(Self::Lxd),
            _ => None,
        }
    }
}

/// Backend selection with per-playthrough overrides
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderSpec {
    pub kind: ProviderKind,
    pub options: ProviderOptions,
}

/// Per-playthrough overrides of the configured image source
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct ProviderOptions {
    pub image_server: Option<String>,
    pub image_protocol: Option<String>,
}

fn select_provider<'de, D>(deserializer: D) -> Result<ProviderSpec, D::Error>
where
    D: Deserializer<'de>,
{
    let providers: Option<BTreeMap<String, Option<ProviderOptions>>> =
        Option::deserialize(deserializer)?;
    let providers = providers.unwrap_or_default();

    let mut entries = providers.into_iter();
    let Some((name, options)) = entries.next() else {
        return Ok(ProviderSpec::default());
    };
    if entries.next().is_some() {
        return Err(de::Error::custom("only one provider may be selected"));
    }

    let kind = ProviderKind::from_name(&name)
        .ok_or_else(|| de::Error::custom(format!("unknown provider '{name}'")))?;
    Ok(ProviderSpec {
        kind,
        options: options.unwrap_or_default(),
    })
}

fn ordered_acts<'de, D>(deserializer: D) -> Result<Vec<Act>, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_map(ActsVisitor)
}

/// Reads the `acts` mapping entry by entry so declaration order survives
struct ActsVisitor;

impl<'de> Visitor<'de> for ActsVisitor {
    type Value = Vec<Act>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a mapping of act ids to acts")
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut acts = Vec::with_capacity(map.size_hint().unwrap_or(0));
        let mut seen = HashSet::new();

        while let Some((id, options)) = map.next_entry::<String, ActOptions>()? {
            if !seen.insert(id.clone()) {
                return Err(de::Error::custom(format!("duplicate act id '{id}'")));
            }
            acts.push(options.into_act(id));
        }
        Ok(acts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_act_defaults() {
        let playthrough = parse(
            r#"
name: minimal
acts:
  web:
    run-on: ubuntu:22.04
"#,
        )
        .unwrap();

        let act = &playthrough.acts[0];
        assert_eq!(act.id, "web");
        assert_eq!(act.name, "web");
        assert!(!act.keep_alive);
        assert!(act.input.is_empty() && act.output.is_empty() && act.scenes.is_empty());
        assert_eq!(playthrough.provider, ProviderSpec::default());
    }

    #[test]
    fn test_provider_overrides() {
        let playthrough = parse(
            r#"
name: custom images
provider:
  lxd:
    image-server: https://images.example.com
    image-protocol: lxd
acts: {}
"#,
        )
        .unwrap();

        assert_eq!(playthrough.provider.kind, ProviderKind::Lxd);
        assert_eq!(
            playthrough.provider.options.image_server.as_deref(),
            Some("https://images.example.com")
        );
        assert_eq!(
            playthrough.provider.options.image_protocol.as_deref(),
            Some("lxd")
        );
    }

    #[test]
    fn test_empty_provider_body() {
        let playthrough = parse("name: x\nprovider:\n  lxd:\nacts: {}\n").unwrap();
        assert_eq!(playthrough.provider.kind, ProviderKind::Lxd);
        assert_eq!(playthrough.provider.options, ProviderOptions::default());
    }

    #[test]
    fn test_unknown_provider() {
        let err = parse("name: x\nprovider:\n  docker: {}\nacts: {}\n").unwrap_err();
        assert!(err.to_string().contains("unknown provider 'docker'"));
    }

    #[test]
    fn test_two_providers() {
        let err = parse("name: x\nprovider:\n  lxd: {}\n  docker: {}\nacts: {}\n").unwrap_err();
        assert!(err.to_string().contains("only one provider"));
    }
}
