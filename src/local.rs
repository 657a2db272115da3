//! Local file library: validates DICOM Part-10 files and copies them in

use async_trait::async_trait;
use pacsflow_activities::{CollaboratorError, FileImporter, ImportReceipt, Validation};
use pacsflow_core::{ImportOptions, WorkflowId};
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const PREAMBLE_LEN: usize = 128;
const MAGIC: &[u8; 4] = b"DICM";

pub struct LocalLibrary {
    root: PathBuf,
}

impl LocalLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where `source` lands: `root[/label]/<path below source_root>`, or
    /// `root[/label]/<file name>` when the file is not under `source_root`.
    fn destination(&self, source: &Path, options: &ImportOptions) -> Result<PathBuf, CollaboratorError> {
        let mut dir = self.root.clone();
        if let Some(label) = &options.source_label {
            check_label(label).map_err(CollaboratorError::Misconfigured)?;
            dir.push(label);
        }
        let relative = options
            .source_root
            .as_deref()
            .and_then(|root| source.strip_prefix(root).ok())
            .filter(|rel| !rel.as_os_str().is_empty());
        match relative {
            Some(rel) if rel.components().all(|c| matches!(c, Component::Normal(_))) => Ok(dir.join(rel)),
            Some(rel) => Err(CollaboratorError::Rejected(format!(
                "{} escapes the source directory",
                rel.display()
            ))),
            None => source
                .file_name()
                .map(|name| dir.join(name))
                .ok_or_else(|| CollaboratorError::Rejected(format!("{} has no file name", source.display()))),
        }
    }
}

/// A label names one directory directly under the library.
pub fn check_label(label: &str) -> Result<(), String> {
    let mut components = Path::new(label).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !label.contains(&['/', '\\'][..]) => Ok(()),
        _ => Err(format!("invalid library label '{}': must be a single directory name", label)),
    }
}

async fn same_content(a: &Path, b: &Path) -> std::io::Result<bool> {
    if fs::metadata(a).await?.len() != fs::metadata(b).await?.len() {
        return Ok(false);
    }
    Ok(fs::read(a).await? == fs::read(b).await?)
}

/// Check the 128-byte preamble is followed by "DICM".
async fn check_part10(path: &Path) -> std::io::Result<Validation> {
    let mut file = fs::File::open(path).await?;
    let mut header = [0u8; PREAMBLE_LEN + 4];
    let mut filled = 0;
    while filled < header.len() {
        let n = file.read(&mut header[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    if filled < header.len() {
        return Ok(Validation::invalid(format!(
            "file is {} bytes, shorter than a DICOM header",
            filled
        )));
    }
    if &header[PREAMBLE_LEN..] != MAGIC {
        return Ok(Validation::invalid("missing DICM prefix after preamble"));
    }
    Ok(Validation::valid())
}

#[async_trait]
impl FileImporter for LocalLibrary {
    async fn validate_file(
        &self,
        path: &str,
        workflow_id: WorkflowId,
        cancel: &CancellationToken,
    ) -> Result<Validation, CollaboratorError> {
        let validation = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CollaboratorError::Cancelled),
            v = check_part10(Path::new(path)) => v?,
        };
        debug!(workflow_id = %workflow_id, file = path, valid = validation.is_valid, "Validated file");
        Ok(validation)
    }

    async fn import_files(
        &self,
        paths: &[String],
        options: &ImportOptions,
    ) -> Result<ImportReceipt, CollaboratorError> {
        let mut receipt = ImportReceipt::default();
        for path in paths {
            let source = Path::new(path);
            let dest = self.destination(source, options)?;
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    CollaboratorError::Misconfigured(format!(
                        "cannot create library directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
            if !options.overwrite_existing && fs::try_exists(&dest).await? {
                if !same_content(source, &dest).await? {
                    return Err(CollaboratorError::Rejected(format!(
                        "{} is already in the library with different content",
                        dest.display()
                    )));
                }
                debug!(file = path, dest = %dest.display(), "Already in library");
                receipt.duplicates += 1;
                continue;
            }
            fs::copy(source, &dest).await?;
            receipt.imported += 1;
        }
        Ok(receipt)
    }
}
