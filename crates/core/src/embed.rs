//! Embedders — turn `Item::compute_searchable_text()` into a fixed-length
//! vector for C4. Two implementations share the [`Embedder`] trait: a
//! deterministic default that needs no model download, and an optional
//! MiniLM encoder behind the same `Embedder` trait as the default hash path.

use std::fmt;

pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Option<Vec<f32>>;
    fn dim(&self) -> usize;
    fn name(&self) -> &str;
}

impl fmt::Debug for dyn Embedder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Embedder({})", self.name())
    }
}

/// Deterministic feature-hashing embedder (the "hash" model in
/// `Config::embedding_model`). No network access, no model weights —
/// every build of this engine can embed text offline. Words are hashed
/// into a 384-dim bag-of-words vector (same dimensionality as MiniLM, so
/// switching models never changes the on-disk layout's width) and the
/// result is L2-normalized so dot product equals cosine similarity, the
/// same invariant the MiniLM path below relies on.
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub const DEFAULT_DIM: usize = 384;

    pub fn new() -> Self {
        Self { dim: Self::DEFAULT_DIM }
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl Embedder for HashEmbedder {
    fn embed(&self, text: &str) -> Option<Vec<f32>> {
        if text.trim().is_empty() {
            return None;
        }
        // `searchable_text` is always lowercase; lowercase here too so a
        // mixed-case query hashes into the same buckets as stored text.
        let lowered = text.to_lowercase();
        let mut v = vec![0f32; self.dim];
        for token in lowered.split_whitespace() {
            let h = fnv1a(token.as_bytes());
            let idx = (h as usize) % self.dim;
            let sign = if (h >> 63) & 1 == 0 { 1.0 } else { -1.0 };
            v[idx] += sign;
        }
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm <= f32::EPSILON {
            return None;
        }
        for x in v.iter_mut() {
            *x /= norm;
        }
        Some(v)
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn name(&self) -> &str {
        "hash"
    }
}

/// 64-bit FNV-1a — cheap, stable across platforms and Rust versions
/// (unlike `std::hash`, whose default hasher is randomized per-process).
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Resolve `Config::embedding_model` to a concrete embedder. Unknown model
/// names fall back to "hash" with a warning rather than failing ingest
/// embedding failure must never block capture.
pub fn resolve_embedder(model_name: &str) -> Box<dyn Embedder> {
    match model_name {
        "hash" | "" => Box::new(HashEmbedder::new()),
        #[cfg(feature = "semantic-ml")]
        "minilm" => match minilm::MiniLmEmbedder::load() {
            Ok(e) => Box::new(e),
            Err(err) => {
                tracing::warn!(error = %err, "Failed to load MiniLM embedder, falling back to hash");
                Box::new(HashEmbedder::new())
            }
        },
        other => {
            tracing::warn!(model = other, "Unknown embedding model, falling back to hash");
            Box::new(HashEmbedder::new())
        }
    }
}

#[cfg(feature = "semantic-ml")]
mod minilm {
    use super::Embedder;
    use candle_core::{DType, Device, Tensor};
    use candle_nn::VarBuilder;
    use candle_transformers::models::bert::{BertModel, Config as BertConfig};
    use hf_hub::{api::sync::Api, Repo, RepoType};
    use std::sync::Mutex;
    use tokenizers::Tokenizer;

    const MODEL_ID: &str = "sentence-transformers/all-MiniLM-L6-v2";
    const DIM: usize = 384;

    /// Real sentence embeddings via the all-MiniLM-L6-v2 BERT encoder,
    /// mean-pooled and L2-normalized, following the standard recipe for
    /// `encode_batch`/`load_model`, trimmed to the single-query shape this
    /// engine needs (enrichment embeds one item's text at a time).
    pub struct MiniLmEmbedder {
        model: Mutex<BertModel>,
        tokenizer: Tokenizer,
        device: Device,
    }

    impl MiniLmEmbedder {
        pub fn load() -> Result<Self, String> {
            let device = Device::Cpu;
            let api = Api::new().map_err(|e| format!("failed to create HF API: {e}"))?;
            let repo = api.repo(Repo::with_revision(
                MODEL_ID.to_string(),
                RepoType::Model,
                "main".to_string(),
            ));

            let config_path =
                repo.get("config.json").map_err(|e| format!("failed to get config.json: {e}"))?;
            let tokenizer_path = repo
                .get("tokenizer.json")
                .map_err(|e| format!("failed to get tokenizer.json: {e}"))?;
            let weights_path = repo
                .get("model.safetensors")
                .map_err(|e| format!("failed to get model.safetensors: {e}"))?;

            let config_str = std::fs::read_to_string(&config_path)
                .map_err(|e| format!("failed to read config: {e}"))?;
            let config: BertConfig =
                serde_json::from_str(&config_str).map_err(|e| format!("failed to parse config: {e}"))?;

            let tokenizer = Tokenizer::from_file(&tokenizer_path)
                .map_err(|e| format!("failed to load tokenizer: {e}"))?;

            let vb = unsafe {
                VarBuilder::from_mmaped_safetensors(&[weights_path], DType::F32, &device)
                    .map_err(|e| format!("failed to load weights: {e}"))?
            };
            let model =
                BertModel::load(vb, &config).map_err(|e| format!("failed to load BERT model: {e}"))?;

            Ok(Self { model: Mutex::new(model), tokenizer, device })
        }
    }

    impl Embedder for MiniLmEmbedder {
        fn embed(&self, text: &str) -> Option<Vec<f32>> {
            if text.trim().is_empty() {
                return None;
            }
            let encoding = self.tokenizer.encode(text, true).ok()?;
            let ids = encoding.get_ids();
            let mask = encoding.get_attention_mask();
            let type_ids = encoding.get_type_ids();
            let len = ids.len();

            let input_ids = Tensor::from_vec(ids.to_vec(), (1, len), &self.device).ok()?;
            let attention_mask =
                Tensor::from_vec(mask.iter().map(|&x| x as f32).collect::<Vec<_>>(), (1, len), &self.device)
                    .ok()?;
            let token_type_ids = Tensor::from_vec(type_ids.to_vec(), (1, len), &self.device).ok()?;

            let model = self.model.lock().unwrap();
            let output = model.forward(&input_ids, &token_type_ids, Some(&attention_mask)).ok()?;

            let mask_expanded = attention_mask.unsqueeze(2).ok()?.broadcast_as(output.shape()).ok()?;
            let masked = output.mul(&mask_expanded).ok()?;
            let summed = masked.sum(1).ok()?;
            let mask_sum = mask_expanded.sum(1).ok()?.clamp(1e-9, f64::MAX).ok()?;
            let mean_pooled = summed.div(&mask_sum).ok()?;

            let norms = mean_pooled
                .sqr()
                .ok()?
                .sum(1)
                .ok()?
                .sqrt()
                .ok()?
                .unsqueeze(1)
                .ok()?
                .broadcast_as(mean_pooled.shape())
                .ok()?
                .clamp(1e-9, f64::MAX)
                .ok()?;
            let normalized = mean_pooled.div(&norms).ok()?;

            normalized.flatten_all().ok()?.to_vec1::<f32>().ok()
        }

        fn dim(&self) -> usize {
            DIM
        }

        fn name(&self) -> &str {
            "minilm"
        }
    }
}
