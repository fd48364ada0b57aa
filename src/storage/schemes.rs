use anyhow::{Context, Result, bail};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::processor::SchemeProcessor;
use crate::models::{BuiltInScheme, ColorScheme};

const SCHEME_EXTENSION: &str = "toml";

/// TOML-file implementation of SchemeProcessor
/// One `<file name>.toml` per scheme in the root directory; bundled
/// schemes come from the built-in table
///
/// A scheme's identity is the `name` stored inside its file. The file each
/// scheme was loaded from (or last saved to) is remembered, so a scheme
/// keeps its file even when the file stem does not match its name.
#[derive(Debug, Default)]
pub struct TomlSchemeStorage {
    /// Scheme name -> backing file
    files: Mutex<HashMap<String, PathBuf>>,
}

impl TomlSchemeStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Default path of the file backing `name` under `root`
    pub fn scheme_path(root: &Path, name: &str) -> PathBuf {
        root.join(format!("{}.{}", scheme_file_name(name), SCHEME_EXTENSION))
    }

    /// File currently backing `name`, if it was loaded or saved
    pub fn file_of(&self, name: &str) -> Option<PathBuf> {
        self.files().get(name).cloned()
    }

    fn files(&self) -> MutexGuard<'_, HashMap<String, PathBuf>> {
        self.files.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn load_file(path: &Path) -> Result<ColorScheme> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read scheme from {:?}", path))?;

        let mut scheme = ColorScheme::from_toml(&contents)
            .with_context(|| format!("Failed to parse scheme file {:?}", path))?;

        if scheme.name.is_empty()
            && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
        {
            scheme.name = urlencoding::decode(stem)
                .map(|name| name.into_owned())
                .unwrap_or_else(|_| stem.to_string());
        }

        Ok(scheme)
    }

    /// Pick the file `name` is written to
    /// Refuses a file that belongs to another scheme
    fn target_path(&self, root: &Path, name: &str) -> Result<PathBuf> {
        let path = {
            let files = self.files();
            if let Some(path) = files.get(name)
                && path.parent() == Some(root)
            {
                return Ok(path.clone());
            }

            let path = Self::scheme_path(root, name);
            if let Some((owner, _)) = files
                .iter()
                .find(|(owner, owned)| **owned == path && owner.as_str() != name)
            {
                bail!("File {:?} already holds scheme '{}'", path, owner);
            }
            path
        };

        // Case-insensitive file systems can still map two names to one file
        if path.exists() {
            match Self::load_file(&path) {
                Ok(existing) if existing.name != name => {
                    bail!("File {:?} already holds scheme '{}'", path, existing.name)
                }
                Ok(_) => {}
                Err(e) => log::warn!("Overwriting unreadable scheme file {:?}: {:#}", path, e),
            }
        }

        Ok(path)
    }
}

impl SchemeProcessor<ColorScheme> for TomlSchemeStorage {
    fn load_all(&self, root: &Path) -> Result<Vec<ColorScheme>> {
        if !root.exists() {
            log::info!("Scheme directory {:?} not found, no user schemes", root);
            self.files().retain(|_, path| path.parent() != Some(root));
            return Ok(Vec::new());
        }

        let mut paths: Vec<PathBuf> = fs::read_dir(root)
            .with_context(|| format!("Failed to read scheme directory {:?}", root))?
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path.extension().and_then(|s| s.to_str()) == Some(SCHEME_EXTENSION)
            })
            .collect();
        paths.sort();

        let mut schemes = Vec::with_capacity(paths.len());
        let mut loaded_files: HashMap<String, PathBuf> = HashMap::new();
        for path in paths {
            match Self::load_file(&path) {
                Ok(scheme) => {
                    if let Some(previous) = loaded_files.insert(scheme.name.clone(), path.clone())
                    {
                        log::warn!(
                            "Scheme '{}' found in both {:?} and {:?}, using the latter",
                            scheme.name,
                            previous,
                            path
                        );
                    }
                    schemes.push(scheme);
                }
                Err(e) => {
                    // One broken file must not hide the others
                    log::warn!("Skipping scheme file {:?}: {:#}", path, e);
                }
            }
        }

        {
            let mut files = self.files();
            files.retain(|_, path| path.parent() != Some(root));
            files.extend(loaded_files);
        }

        log::info!("Loaded {} scheme(s) from {:?}", schemes.len(), root);
        Ok(schemes)
    }

    fn save(&self, root: &Path, scheme: &ColorScheme) -> Result<()> {
        let contents = scheme.to_toml()?;

        fs::create_dir_all(root)
            .with_context(|| format!("Failed to create directory {:?}", root))?;

        let path = self.target_path(root, &scheme.name)?;
        let tmp_path = path.with_extension("toml.tmp");

        fs::write(&tmp_path, contents)
            .with_context(|| format!("Failed to write to temporary file {:?}", tmp_path))?;

        fs::rename(&tmp_path, &path)
            .with_context(|| format!("Failed to rename {:?} to {:?}", tmp_path, path))?;

        log::debug!("Saved scheme '{}' to {:?}", scheme.name, path);
        self.files().insert(scheme.name.clone(), path);
        Ok(())
    }

    fn delete(&self, root: &Path, name: &str) -> Result<()> {
        let path = match self.file_of(name) {
            Some(path) => path,
            None => {
                let path = Self::scheme_path(root, name);
                if !path.exists() {
                    return Ok(());
                }
                match Self::load_file(&path) {
                    Ok(existing) if existing.name == name => path,
                    Ok(existing) => {
                        log::warn!(
                            "Not deleting {:?}: it holds scheme '{}'",
                            path,
                            existing.name
                        );
                        return Ok(());
                    }
                    Err(e) => {
                        log::warn!("Not deleting unreadable scheme file {:?}: {:#}", path, e);
                        return Ok(());
                    }
                }
            }
        };

        if path.exists() {
            fs::remove_file(&path).with_context(|| format!("Failed to delete {:?}", path))?;
            log::debug!("Deleted scheme file {:?}", path);
        }

        self.files().remove(name);
        Ok(())
    }

    fn load_bundled(&self, resource_name: &str) -> Result<Option<ColorScheme>> {
        Ok(BuiltInScheme::from_name(resource_name).map(|builtin| builtin.to_scheme()))
    }

    fn is_lazy(&self) -> bool {
        true
    }

    fn supports_reload(&self) -> bool {
        true
    }

    fn is_metadata_editable(&self, scheme: &ColorScheme) -> bool {
        !scheme.bundled
    }
}

/// File-system safe form of a scheme name
///
/// Percent-encodes everything outside `[A-Za-z0-9._~-]`, so distinct names
/// always get distinct file names. A leading dot is encoded as `%2E` and
/// the empty name becomes `%`.
pub fn scheme_file_name(name: &str) -> String {
    if name.is_empty() {
        return "%".to_string();
    }

    let encoded = urlencoding::encode(name);
    match encoded.strip_prefix('.') {
        Some(rest) => format!("%2E{}", rest),
        None => encoded.into_owned(),
    }
}
