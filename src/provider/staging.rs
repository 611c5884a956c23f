//! In-instance staging layout and transfer scripts
//!
//! Every instance gets two staging directories before a run first uses it:
//! archives pushed into the instance land in `input/`, archives packed for
//! download are written to `output/`. Each transfer uses a fresh token so several
//! artifacts can move through the same instance without colliding.

use crate::artifact::ArtifactKind;

/// Default staging root inside instances
pub const STAGING_ROOT: &str = "/root/.gambol";

/// Staging directories of an instance
#[derive(Debug, Clone)]
pub struct Staging {
    root: String,
}

impl Default for Staging {
    fn default() -> Self {
        Self::new(STAGING_ROOT)
    }
}

impl Staging {
    pub fn new(root: &str) -> Self {
        Self {
            root: root.trim_end_matches('/').to_string(),
        }
    }

    pub fn input_dir(&self) -> String {
        format!("{}/input", self.root)
    }

    pub fn output_dir(&self) -> String {
        format!("{}/output", self.root)
    }

    /// Where scene scripts are uploaded before they run
    pub fn script_path(&self) -> String {
        format!("{}/run", self.root)
    }

    /// Command that creates the staging directories
    pub fn prepare_command(&self) -> Vec<String> {
        vec![
            "mkdir".to_string(),
            "-p".to_string(),
            self.input_dir(),
            self.output_dir(),
        ]
    }

    pub fn inbound_archive(&self, token: &str) -> String {
        format!("{}/{}.tar", self.input_dir(), token)
    }

    pub fn outbound_archive(&self, token: &str) -> String {
        format!("{}/{}.tar", self.output_dir(), token)
    }

    /// Script that unpacks an uploaded archive onto `target`
    pub fn unpack_script(&self, kind: ArtifactKind, token: &str, target: &str) -> String {
        let archive = shell_quote(&self.inbound_archive(token));
        let target = shell_quote(target);
        match kind {
            ArtifactKind::File => format!(
                r#"set -eu
ARCHIVE={archive}
TARGET={target}
OUTPUT=$(mktemp -d)
NAME=$(tar -tf "$ARCHIVE" | head -n 1)
tar -xf "$ARCHIVE" -C "$OUTPUT"
mkdir -p "$(dirname "$TARGET")"
mv -f "$OUTPUT/$NAME" "$TARGET"
rm -rf "$OUTPUT" "$ARCHIVE"
"#
            ),
            ArtifactKind::Directory => format!(
                r#"set -eu
ARCHIVE={archive}
TARGET={target}
mkdir -p "$TARGET"
tar -xf "$ARCHIVE" -C "$TARGET" --strip-components 1
rm -f "$ARCHIVE"
"#
            ),
        }
    }

    /// Script that packs `target` into an archive for download
    ///
    /// The archive holds the target under its own name, the same shape the
    /// host side produces.
    pub fn pack_script(&self, token: &str, target: &str) -> String {
        let archive = shell_quote(&self.outbound_archive(token));
        let target = shell_quote(target.trim_end_matches('/'));
        format!(
            r#"set -eu
ARCHIVE={archive}
TARGET={target}
tar -C "$(dirname "$TARGET")" -cf "$ARCHIVE" "$(basename "$TARGET")"
"#
        )
    }

    /// Script that removes a downloaded archive
    pub fn discard_script(&self, token: &str) -> String {
        format!("rm -f {}\n", shell_quote(&self.outbound_archive(token)))
    }
}

/// Fresh token for naming a transfer's staging archive
pub fn transfer_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Quote a value for POSIX shells
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
