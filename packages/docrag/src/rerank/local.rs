//! Local cross-encoder reranker.
//!
//! Each (query, candidate) pair is rendered into the relevance prompt and
//! scored by a causal LM: the probability of the affirmative token at the
//! final position. Tokenization pads on the LEFT so the predicted position
//! is the rightmost index for every row in the batch. Inference runs on a
//! dedicated blocking worker thread, the same discipline as the local
//! embedder.

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::info;
use tract_onnx::prelude::*;

use super::{Calibration, Reranker};
use crate::config::RerankerConfig;
use crate::embedding::local::model_paths;
use crate::error::{RerankError, RerankResult};

struct RerankJob {
    query: String,
    candidates: Vec<String>,
    respond: oneshot::Sender<RerankResult<Vec<(usize, f32)>>>,
}

/// Cross-encoder model behind the reranker contract.
pub struct LocalReranker {
    jobs: mpsc::Sender<RerankJob>,
}

/// Render the scoring prompt for one pair.
fn relevance_prompt(query: &str, candidate: &str) -> String {
    format!("query: {query}\ndocument: {candidate}\nRelevant (yes/no)?")
}

impl LocalReranker {
    /// Load the model and start the scoring worker. Fails when the model
    /// files or the yes/no tokens are missing; callers degrade to the
    /// cosine fallback on failure.
    pub fn load(config: &RerankerConfig) -> RerankResult<Self> {
        let (onnx_path, tokenizer_path) =
            model_paths(&config.model).map_err(|e| RerankError::Model(e.to_string()))?;

        let tokenizer = tokenizers::Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| RerankError::Model(format!("load tokenizer: {e}")))?;

        let yes_id = tokenizer
            .token_to_id("yes")
            .ok_or_else(|| RerankError::Model("tokenizer has no 'yes' token".to_string()))?;
        let no_id = tokenizer
            .token_to_id("no")
            .ok_or_else(|| RerankError::Model("tokenizer has no 'no' token".to_string()))?;
        let pad_id = tokenizer.token_to_id("<|endoftext|>").unwrap_or(0);

        let model = tract_onnx::onnx()
            .model_for_path(&onnx_path)
            .map_err(|e| RerankError::Model(format!("load ONNX: {e}")))?
            .into_optimized()
            .map_err(|e| RerankError::Model(format!("optimize: {e}")))?
            .into_runnable()
            .map_err(|e| RerankError::Model(format!("build runnable: {e}")))?;

        let calibration = config.calibration.then(Calibration::identity);

        let (jobs, mut queue) = mpsc::channel::<RerankJob>(64);
        std::thread::Builder::new()
            .name("docrag-reranker".to_string())
            .spawn(move || {
                while let Some(job) = queue.blocking_recv() {
                    let result = score_batch(
                        &model,
                        &tokenizer,
                        &job.query,
                        &job.candidates,
                        yes_id,
                        no_id,
                        pad_id,
                        calibration.as_ref(),
                    );
                    let _ = job.respond.send(result);
                }
            })
            .map_err(|e| RerankError::Model(format!("spawn worker: {e}")))?;

        info!(model = %config.model, calibrated = config.calibration, "reranker model loaded");

        Ok(Self { jobs })
    }
}

#[async_trait]
impl Reranker for LocalReranker {
    async fn rerank(&self, query: &str, candidates: &[String]) -> RerankResult<Vec<(usize, f32)>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let (respond, receive) = oneshot::channel();
        self.jobs
            .send(RerankJob {
                query: query.to_string(),
                candidates: candidates.to_vec(),
                respond,
            })
            .await
            .map_err(|_| RerankError::WorkerGone)?;
        receive.await.map_err(|_| RerankError::WorkerGone)?
    }

    fn model_backed(&self) -> bool {
        true
    }
}

type RunnableOnnx = TypedRunnableModel<TypedModel>;

#[allow(clippy::too_many_arguments)]
fn score_batch(
    model: &RunnableOnnx,
    tokenizer: &tokenizers::Tokenizer,
    query: &str,
    candidates: &[String],
    yes_id: u32,
    no_id: u32,
    pad_id: u32,
    calibration: Option<&Calibration>,
) -> RerankResult<Vec<(usize, f32)>> {
    let encodings: Vec<_> = candidates
        .iter()
        .map(|candidate| {
            tokenizer
                .encode(relevance_prompt(query, candidate), true)
                .map_err(|e| RerankError::Model(format!("tokenize: {e}")))
        })
        .collect::<RerankResult<Vec<_>>>()?;

    let batch = encodings.len();
    let seq_len = encodings
        .iter()
        .map(|enc| enc.get_ids().len())
        .max()
        .unwrap_or(1)
        .max(1);

    // Left padding: pad ids first, real tokens flush right, so the
    // final-position logits are the prediction for every row.
    let mut input_ids = vec![pad_id as i64; batch * seq_len];
    let mut attention_mask = vec![0i64; batch * seq_len];
    for (i, enc) in encodings.iter().enumerate() {
        let ids = enc.get_ids();
        let offset = seq_len - ids.len();
        for (j, &id) in ids.iter().enumerate() {
            input_ids[i * seq_len + offset + j] = id as i64;
            attention_mask[i * seq_len + offset + j] = 1;
        }
    }

    let input_ids_t: Tensor = ndarray::Array2::from_shape_vec((batch, seq_len), input_ids)
        .map_err(|e| RerankError::Model(format!("input ids shape: {e}")))?
        .into();
    let attention_mask_t: Tensor = ndarray::Array2::from_shape_vec((batch, seq_len), attention_mask)
        .map_err(|e| RerankError::Model(format!("attention mask shape: {e}")))?
        .into();

    let outputs = model
        .run(tvec!(input_ids_t.into(), attention_mask_t.into()))
        .map_err(|e| RerankError::Model(format!("inference: {e}")))?;
    let logits = outputs
        .into_iter()
        .next()
        .ok_or_else(|| RerankError::Model("no logits tensor".to_string()))?;
    let view = logits
        .to_array_view::<f32>()
        .map_err(|e| RerankError::Model(format!("logits to array: {e}")))?;

    let shape = view.shape().to_vec();
    if shape.len() != 3 {
        return Err(RerankError::Model(format!(
            "unexpected logits rank: {}",
            shape.len()
        )));
    }
    let last = shape[1] - 1;

    let mut scored = Vec::with_capacity(batch);
    for i in 0..batch {
        let final_logits: Vec<f32> = view
            .slice(ndarray::s![i, last, ..])
            .iter()
            .copied()
            .collect();
        let (yes, no) = match (
            final_logits.get(yes_id as usize),
            final_logits.get(no_id as usize),
        ) {
            (Some(&yes), Some(&no)) => (yes, no),
            _ => {
                return Err(RerankError::Model(format!(
                    "yes/no token ids out of vocabulary range ({})",
                    final_logits.len()
                )))
            }
        };
        let mut score = yes_probability(yes, no);
        if let Some(calibration) = calibration {
            score = calibration.apply(score);
        }
        scored.push((i, score));
    }
    Ok(scored)
}

/// Softmax over the {no, yes} pair; returns P(yes) in [0, 1].
fn yes_probability(yes_logit: f32, no_logit: f32) -> f32 {
    let max = yes_logit.max(no_logit);
    let yes = (yes_logit - max).exp();
    let no = (no_logit - max).exp();
    yes / (yes + no)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yes_probability_bounds() {
        assert!((yes_probability(0.0, 0.0) - 0.5).abs() < 1e-6);
        assert!(yes_probability(10.0, -10.0) > 0.999);
        assert!(yes_probability(-10.0, 10.0) < 0.001);
    }

    #[test]
    fn test_relevance_prompt_template() {
        let prompt = relevance_prompt("how to sort", "use sort()");
        assert_eq!(prompt, "query: how to sort\ndocument: use sort()\nRelevant (yes/no)?");
    }
}
