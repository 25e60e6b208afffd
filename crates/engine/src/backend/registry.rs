//! Maps configured backend names to [`Backend`] variants.

use std::path::Path;

use tracing::{info, warn};

use rnaflow_types::BackendKind;

use super::{Backend, BackendContext, Hisat2Backend, KallistoBackend, SalmonBackend};
use crate::config::ResolvedConfig;
use crate::error::BackendUnavailableError;

/// Names of the backends to run, in execution order.
///
/// With `multi_aligner` every entry of the backend section is returned in file order;
/// otherwise the single configured `aligner`, defaulting to kallisto.
pub fn available_backends(config: &ResolvedConfig) -> Vec<String> {
    let parameters = config.parameters();
    if parameters.multi_aligner {
        let names: Vec<String> = config.backends().map(|section| section.keys().cloned().collect()).unwrap_or_default();
        info!(backends = ?names, "multi-aligner mode");
        return names;
    }
    let selected = parameters
        .aligner
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(BackendKind::DEFAULT.as_str())
        .to_string();
    info!(backend = %selected, "single aligner mode");
    vec![selected]
}

/// Build the backend named `name`, reporting why it is unavailable.
pub fn try_create(name: &str, config: &ResolvedConfig, output_base_dir: &Path) -> Result<Backend, BackendUnavailableError> {
    let kind: BackendKind = name.parse().map_err(|_| BackendUnavailableError::Unsupported(name.to_string()))?;
    let section = config
        .backend_config(name)
        .ok_or_else(|| BackendUnavailableError::MissingSection(name.to_string()))?;
    let context = BackendContext::from_config(config, output_base_dir);
    let backend = match kind {
        BackendKind::Hisat2 => Backend::Hisat2(Hisat2Backend::from_config(section, &context)?),
        BackendKind::Kallisto => Backend::Kallisto(KallistoBackend::from_config(section, &context)?),
        BackendKind::Salmon => Backend::Salmon(SalmonBackend::from_config(section, &context)?),
    };
    Ok(backend)
}

/// Build the backend named `name`, or log a warning and return `None`.
///
/// Step execution goes through [`BackendSelection::from_config`] instead, which keeps the
/// reason for every unavailable backend for the step metadata.
pub fn create(name: &str, config: &ResolvedConfig, output_base_dir: &Path) -> Option<Backend> {
    try_create(name, config, output_base_dir)
        .inspect_err(|error| log_unavailable(name, error))
        .ok()
}

fn log_unavailable(name: &str, error: &BackendUnavailableError) {
    warn!(backend = %name, error = %error, "backend unavailable; skipping");
}

/// Every requested backend, split into those that could be built and those that could not.
#[derive(Debug, Default)]
pub struct BackendSelection {
    pub backends: Vec<Backend>,
    pub unavailable: Vec<(String, BackendUnavailableError)>,
}

impl BackendSelection {
    /// Build each name from [`available_backends`] with [`try_create`], preserving order.
    pub fn from_config(config: &ResolvedConfig, output_base_dir: &Path) -> Self {
        let mut selection = Self::default();
        for name in available_backends(config) {
            match try_create(&name, config, output_base_dir) {
                Ok(backend) => selection.backends.push(backend),
                Err(error) => {
                    log_unavailable(&name, &error);
                    selection.unavailable.push((name, error));
                }
            }
        }
        selection
    }

    pub fn requested(&self) -> usize {
        self.backends.len() + self.unavailable.len()
    }
}
