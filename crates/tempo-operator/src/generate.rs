//!
//! # Offline manifest generation
//!
//! Builds the objects of one instance without a cluster: the instance is defaulted,
//! parameters are taken from the operator configuration alone and the result is
//! written as a multi document YAML stream.
//!
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, instrument};

use tempo_operator_metadata::config::ProjectConfig;
use tempo_operator_metadata::stack::TempoStack;

use crate::manifests;
use crate::params::Params;
use crate::templates::TemplateRegistry;
use crate::webhook::Defaulter;

const DEFAULT_NAMESPACE: &str = "default";
const DOCUMENT_SEPARATOR: &str = "---\n";

/// read the instance from `path`, or standard input without one
pub fn read_stack(path: Option<&Path>) -> Result<TempoStack> {
    let content = match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut content = String::new();
            std::io::stdin()
                .read_to_string(&mut content)
                .context("failed to read standard input")?;
            content
        }
    };
    parse_stack(&content)
}

pub fn parse_stack(content: &str) -> Result<TempoStack> {
    let mut stack: TempoStack =
        serde_yaml::from_str(content).context("failed to parse TempoStack")?;
    if stack.metadata.name.as_deref().unwrap_or_default().is_empty() {
        anyhow::bail!("TempoStack must have metadata.name");
    }
    stack
        .metadata
        .namespace
        .get_or_insert_with(|| DEFAULT_NAMESPACE.to_owned());
    Ok(stack)
}

/// all objects of `stack` as YAML documents
#[instrument(skip_all, fields(tempo = stack.metadata.name.as_deref().unwrap_or_default()))]
pub fn generate(mut stack: TempoStack, config: &ProjectConfig) -> Result<String> {
    Defaulter::new(&config.images)
        .default(&mut stack)
        .context("failed to default TempoStack")?;

    let params = Params::offline(stack, config.clone());
    let registry = TemplateRegistry::new()?;
    let files = registry.render_config(&params)?;
    let gateway = registry.render_gateway(&params)?;
    let objects = manifests::build(&params, &files, gateway.as_ref())?;
    debug!(objects = objects.len(), "manifests built");

    let mut documents = Vec::with_capacity(objects.len());
    for object in &objects {
        let value = object
            .to_value()
            .with_context(|| format!("failed to serialize {}", object.key()))?;
        documents.push(serde_yaml::to_string(&value)?);
    }
    Ok(documents.join(DOCUMENT_SEPARATOR))
}
