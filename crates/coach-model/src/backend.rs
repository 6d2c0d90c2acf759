use std::fmt::Debug;
use std::sync::Arc;

use crate::error::{ModelError, Result};

/// Pluggable compute for the transformer's hot loops.
///
/// Everything works on row-major f32 slices; weight matrices are
/// `[rows, cols]` as stored in GGUF (output dimension first).
pub trait ComputeBackend: Send + Sync + Debug {
    fn name(&self) -> &str;

    /// `y = W @ x` for `W: [rows, cols]`, `x: [cols]`.
    fn matvec(&self, w: &[f32], x: &[f32], rows: usize, cols: usize) -> Result<Vec<f32>>;

    /// `x * weight / sqrt(mean(x^2) + eps)`.
    fn rms_norm(&self, x: &[f32], weight: &[f32], eps: f32) -> Result<Vec<f32>>;

    /// Rotates adjacent pairs of every head in place for position `pos`.
    /// `freq_factors`, when present, divides each pair's frequency
    /// (`rope_freqs.weight` long-context scaling).
    fn rope(
        &self,
        x: &mut [f32],
        n_heads: usize,
        head_dim: usize,
        pos: usize,
        theta_base: f32,
        freq_factors: Option<&[f32]>,
    ) -> Result<()>;

    fn silu_mul(&self, gate: &[f32], up: &[f32]) -> Result<Vec<f32>>;
}

/// Straight-loop reference implementation.
#[derive(Debug, Clone, Default)]
pub struct CpuBackend;

impl CpuBackend {
    pub fn new() -> Self {
        CpuBackend
    }
}

impl ComputeBackend for CpuBackend {
    fn name(&self) -> &str {
        "cpu"
    }

    fn matvec(&self, w: &[f32], x: &[f32], rows: usize, cols: usize) -> Result<Vec<f32>> {
        if w.len() != rows * cols || x.len() != cols {
            return Err(ModelError::Other(format!(
                "matvec: w.len()={} x.len()={} for [{}x{}]",
                w.len(),
                x.len(),
                rows,
                cols
            )));
        }
        Ok(w.chunks_exact(cols)
            .map(|row| row.iter().zip(x).map(|(a, b)| a * b).sum())
            .collect())
    }

    fn rms_norm(&self, x: &[f32], weight: &[f32], eps: f32) -> Result<Vec<f32>> {
        if x.len() != weight.len() {
            return Err(ModelError::Other(format!(
                "rms_norm: x.len()={} but weight.len()={}",
                x.len(),
                weight.len()
            )));
        }
        let mean_sq = x.iter().map(|v| v * v).sum::<f32>() / x.len() as f32;
        let inv = 1.0 / (mean_sq + eps).sqrt();
        Ok(x.iter().zip(weight).map(|(v, w)| v * inv * w).collect())
    }

    fn rope(
        &self,
        x: &mut [f32],
        n_heads: usize,
        head_dim: usize,
        pos: usize,
        theta_base: f32,
        freq_factors: Option<&[f32]>,
    ) -> Result<()> {
        if x.len() != n_heads * head_dim || head_dim % 2 != 0 {
            return Err(ModelError::Other(format!(
                "rope: x.len()={} for {} heads of {}",
                x.len(),
                n_heads,
                head_dim
            )));
        }
        for i in 0..head_dim / 2 {
            let mut freq = theta_base.powf(-(2.0 * i as f32) / head_dim as f32);
            if let Some(f) = freq_factors.and_then(|f| f.get(i)) {
                freq /= f;
            }
            let (sin, cos) = (pos as f32 * freq).sin_cos();
            for head in x.chunks_exact_mut(head_dim) {
                let (x0, x1) = (head[2 * i], head[2 * i + 1]);
                head[2 * i] = x0 * cos - x1 * sin;
                head[2 * i + 1] = x0 * sin + x1 * cos;
            }
        }
        Ok(())
    }

    fn silu_mul(&self, gate: &[f32], up: &[f32]) -> Result<Vec<f32>> {
        if gate.len() != up.len() {
            return Err(ModelError::Other(format!(
                "silu_mul: gate.len()={} but up.len()={}",
                gate.len(),
                up.len()
            )));
        }
        Ok(gate
            .iter()
            .zip(up)
            .map(|(&g, &u)| g / (1.0 + (-g).exp()) * u)
            .collect())
    }
}

/// Probes for a hardware accelerator. This build ships the CPU backend only,
/// so offload requests fall back to it.
pub fn detect_accelerator() -> Option<Arc<dyn ComputeBackend>> {
    None
}

/// Which backend runs each transformer layer.
#[derive(Debug, Clone)]
pub struct LayerPlacement {
    cpu: Arc<dyn ComputeBackend>,
    accel: Option<Arc<dyn ComputeBackend>>,
    gpu_layers: usize,
}

impl LayerPlacement {
    /// Layers with index `< gpu_layers` run on `accel` when it exists.
    pub fn new(accel: Option<Arc<dyn ComputeBackend>>, gpu_layers: usize) -> Self {
        if gpu_layers > 0 && accel.is_none() {
            tracing::info!(gpu_layers, "no accelerator available, running all layers on cpu");
        }
        LayerPlacement {
            cpu: Arc::new(CpuBackend::new()),
            accel,
            gpu_layers,
        }
    }

    pub fn cpu_only() -> Self {
        LayerPlacement {
            cpu: Arc::new(CpuBackend::new()),
            accel: None,
            gpu_layers: 0,
        }
    }

    pub fn for_layer(&self, layer: usize) -> &dyn ComputeBackend {
        match &self.accel {
            Some(accel) if layer < self.gpu_layers => accel.as_ref(),
            _ => self.cpu.as_ref(),
        }
    }

    /// Backend for the embedding/output stages.
    pub fn host(&self) -> &dyn ComputeBackend {
        self.cpu.as_ref()
    }

    pub fn offloaded_layers(&self, n_layers: usize) -> usize {
        if self.accel.is_some() {
            self.gpu_layers.min(n_layers)
        } else {
            0
        }
    }
}
