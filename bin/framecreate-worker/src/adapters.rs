//! Adapter ("LoRA") composition.
//!
//! Adapter state is never incrementally patched: each generation fully
//! unbinds and rebinds from the request's list, so a reused pipeline can
//! never carry a stale adapter from a previous job.

use framecreate_diffusion::{AdapterWeight, Pipeline};

use crate::error::WorkerError;
use crate::protocol::LoraSpec;

/// Rebind the pipeline's adapter stack from `loras`.
///
/// Entries are loaded in list order under positionally stable names
/// (`lora_0`, `lora_1`, ...), then activated simultaneously with their
/// exact weights.  An entry whose path does not exist aborts the whole
/// request before any inference work begins.
pub fn bind_adapters(pipeline: &mut dyn Pipeline, loras: &[LoraSpec]) -> Result<(), WorkerError> {
    pipeline.unload_adapters();
    if loras.is_empty() {
        return Ok(());
    }

    let mut active = Vec::with_capacity(loras.len());
    for (index, lora) in loras.iter().enumerate() {
        if !lora.path.exists() {
            return Err(WorkerError::LoraNotFound(lora.path.clone()));
        }
        let name = format!("lora_{index}");
        pipeline.load_adapter(&name, &lora.path)?;
        active.push(AdapterWeight {
            name,
            weight: lora.weight,
        });
    }

    pipeline.set_adapters(&active)?;
    Ok(())
}
