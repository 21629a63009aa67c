//! Local ONNX embedding provider.
//!
//! Pure-Rust inference: the model loads once with tract-onnx (a frozen
//! inference graph, f32 throughout), tokenization uses the `tokenizers`
//! crate with right padding, and the sequence embedding is the hidden state
//! of the last non-pad token. All calls are serialized through one
//! dedicated blocking worker thread that owns the model, so inference never
//! blocks the async runtime and the accelerator sees one request at a time.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::info;
use tract_onnx::prelude::*;

use super::{normalize_l2, EmbeddingProvider};
use crate::config::EmbeddingConfig;
use crate::error::{EmbeddingError, EmbeddingResult};

struct EmbedJob {
    texts: Vec<String>,
    respond: oneshot::Sender<EmbeddingResult<Vec<Vec<f32>>>>,
}

/// Locally hosted transformer embedder behind the provider contract.
pub struct LocalProvider {
    jobs: mpsc::Sender<EmbedJob>,
    dimension: usize,
}

impl LocalProvider {
    /// Load the model and tokenizer from the local model cache and start
    /// the inference worker.
    pub fn load(config: &EmbeddingConfig) -> EmbeddingResult<Self> {
        let (onnx_path, tokenizer_path) = model_paths(&config.model)?;

        let tokenizer = tokenizers::Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| EmbeddingError::Model(format!("load tokenizer: {e}")))?;

        let model = tract_onnx::onnx()
            .model_for_path(&onnx_path)
            .map_err(|e| EmbeddingError::Model(format!("load ONNX: {e}")))?
            .into_optimized()
            .map_err(|e| EmbeddingError::Model(format!("optimize: {e}")))?
            .into_runnable()
            .map_err(|e| EmbeddingError::Model(format!("build runnable: {e}")))?;

        let max_length = config.max_length.max(1);
        let dimension = config.dimension;

        let (jobs, mut queue) = mpsc::channel::<EmbedJob>(64);
        std::thread::Builder::new()
            .name("docrag-embedder".to_string())
            .spawn(move || {
                while let Some(job) = queue.blocking_recv() {
                    let result = run_batch(&model, &tokenizer, &job.texts, max_length, dimension);
                    let _ = job.respond.send(result);
                }
            })
            .map_err(|e| EmbeddingError::Model(format!("spawn worker: {e}")))?;

        info!(
            model = %config.model,
            dimension,
            max_length,
            "local embedding model loaded"
        );

        Ok(Self { jobs, dimension })
    }
}

#[async_trait]
impl EmbeddingProvider for LocalProvider {
    async fn embed_batch(&self, texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let (respond, receive) = oneshot::channel();
        self.jobs
            .send(EmbedJob {
                texts: texts.to_vec(),
                respond,
            })
            .await
            .map_err(|_| EmbeddingError::WorkerGone)?;
        receive.await.map_err(|_| EmbeddingError::WorkerGone)?
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Resolve `model.onnx` and `tokenizer.json` in the local model cache.
/// Shared with the reranker, which caches its model the same way.
pub(crate) fn model_paths(model_name: &str) -> EmbeddingResult<(PathBuf, PathBuf)> {
    let base = match std::env::var("DOCRAG_MODEL_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".cache").join("docrag").join("models")
        }
    };
    let dir = base.join(model_name.replace('/', "__"));
    let onnx = dir.join("model.onnx");
    let tokenizer = dir.join("tokenizer.json");
    if !onnx.exists() || !tokenizer.exists() {
        return Err(EmbeddingError::Model(format!(
            "model files not found under {} (expected model.onnx and tokenizer.json)",
            dir.display()
        )));
    }
    Ok((onnx, tokenizer))
}

type RunnableOnnx = TypedRunnableModel<TypedModel>;

fn run_batch(
    model: &RunnableOnnx,
    tokenizer: &tokenizers::Tokenizer,
    texts: &[String],
    max_length: usize,
    dimension: usize,
) -> EmbeddingResult<Vec<Vec<f32>>> {
    let encodings: Vec<_> = texts
        .iter()
        .map(|text| {
            tokenizer
                .encode(text.as_str(), true)
                .map_err(|e| EmbeddingError::Model(format!("tokenize: {e}")))
        })
        .collect::<EmbeddingResult<Vec<_>>>()?;

    let lengths: Vec<usize> = encodings
        .iter()
        .map(|enc| enc.get_ids().len().clamp(1, max_length))
        .collect();
    let batch = encodings.len();
    let seq_len = lengths.iter().copied().max().unwrap_or(1);

    // Right padding: real tokens first, pad ids after. Last-token pooling
    // depends on this layout.
    let mut input_ids = vec![0i64; batch * seq_len];
    let mut attention_mask = vec![0i64; batch * seq_len];
    for (i, enc) in encodings.iter().enumerate() {
        for (j, &id) in enc.get_ids().iter().take(lengths[i]).enumerate() {
            input_ids[i * seq_len + j] = id as i64;
            attention_mask[i * seq_len + j] = 1;
        }
    }

    let input_ids_t: Tensor = ndarray::Array2::from_shape_vec((batch, seq_len), input_ids)
        .map_err(|e| EmbeddingError::Model(format!("input ids shape: {e}")))?
        .into();
    let attention_mask_t: Tensor = ndarray::Array2::from_shape_vec((batch, seq_len), attention_mask)
        .map_err(|e| EmbeddingError::Model(format!("attention mask shape: {e}")))?
        .into();

    let outputs = model
        .run(tvec!(input_ids_t.into(), attention_mask_t.into()))
        .map_err(|e| EmbeddingError::Model(format!("inference: {e}")))?;
    let output = outputs
        .into_iter()
        .next()
        .ok_or_else(|| EmbeddingError::Model("no output tensor".to_string()))?;
    let view = output
        .to_array_view::<f32>()
        .map_err(|e| EmbeddingError::Model(format!("output to array: {e}")))?;

    let shape = view.shape().to_vec();
    let mut vectors = Vec::with_capacity(batch);
    match shape.len() {
        // [batch, hidden]: the graph pools internally.
        2 => {
            for i in 0..batch {
                let row: Vec<f32> = view.slice(ndarray::s![i, ..]).iter().copied().collect();
                vectors.push(row);
            }
        }
        // [batch, seq, hidden]: pool the last non-pad position.
        3 => {
            for (i, &len) in lengths.iter().enumerate() {
                let last = len.min(shape[1]).saturating_sub(1);
                let row: Vec<f32> = view.slice(ndarray::s![i, last, ..]).iter().copied().collect();
                vectors.push(row);
            }
        }
        other => {
            return Err(EmbeddingError::Model(format!(
                "unexpected output rank: {other}"
            )))
        }
    }

    for vector in &mut vectors {
        if vector.len() != dimension {
            return Err(EmbeddingError::DimensionMismatch {
                expected: dimension,
                actual: vector.len(),
            });
        }
        normalize_l2(vector);
    }

    Ok(vectors)
}
