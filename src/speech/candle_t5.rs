//! Quantized Flan-T5 consent classifier.
//!
//! Downloads model artifacts from HuggingFace on first use, then runs
//! greedy decoding over a constrained prompt that asks for a one-line JSON
//! verdict. Requires the `classifier` feature.

#![cfg(feature = "classifier")]

use crate::error::{FaceveilError, Result};
use crate::speech::classifier::{parse_verdict, ConsentClassifier, ConsentVerdict};

use candle_core::{Device, Tensor};
use candle_transformers::models::quantized_t5::{Config as T5Config, T5ForConditionalGeneration};
use candle_transformers::quantized_var_builder::VarBuilder;
use hf_hub::api::sync::Api;
use tokenizers::Tokenizer;

/// Maximum number of tokens to generate for a verdict.
const MAX_DECODE_TOKENS: usize = 64;

/// T5 end-of-sequence token id.
const EOS_TOKEN: u32 = 1;

const MODEL_FILENAME: &str = "model.gguf";
const CONFIG_FILENAME: &str = "config.json";
const TOKENIZER_FILENAME: &str = "tokenizer.json";

/// The classification instruction. Only explicit, first-person,
/// present-tense consent counts; reported speech, conditionals, past tense,
/// and negations must come back negative.
const PROMPT_PREFIX: &str = "Decide if the statement contains the speaker's own explicit \
consent, given now, to being recorded or filmed. Statements about other people, \
hypotheticals, questions, past events, or refusals are not consent. Reply with one JSON \
object {\"consent\": true|false, \"speaker\": \"name or UNKNOWN\"}. Statement: ";

/// Consent classifier backed by a quantized Flan-T5 model.
pub struct CandleT5Classifier {
    model: T5ForConditionalGeneration,
    tokenizer: Tokenizer,
    device: Device,
    model_name: String,
}

impl CandleT5Classifier {
    /// Loads model, config, and tokenizer from the given HuggingFace repo,
    /// downloading into the local cache on first call.
    pub fn load(repo_name: &str) -> Result<Self> {
        let device = Device::Cpu;
        let api = Api::new()
            .map_err(|e| FaceveilError::Classification {
                message: format!("HF hub API init: {e}"),
            })?;
        let repo = api.model(repo_name.to_string());

        let model_path = repo
            .get(MODEL_FILENAME)
            .map_err(|e| FaceveilError::Classification {
                message: format!("download {MODEL_FILENAME}: {e}"),
            })?;
        let config_path = repo
            .get(CONFIG_FILENAME)
            .map_err(|e| FaceveilError::Classification {
                message: format!("download {CONFIG_FILENAME}: {e}"),
            })?;
        let tokenizer_path = repo
            .get(TOKENIZER_FILENAME)
            .map_err(|e| FaceveilError::Classification {
                message: format!("download {TOKENIZER_FILENAME}: {e}"),
            })?;

        let config_bytes = std::fs::read(&config_path)?;
        let config: T5Config =
            serde_json::from_slice(&config_bytes).map_err(|e| FaceveilError::Classification {
                message: format!("parse T5 config: {e}"),
            })?;

        let vb = VarBuilder::from_gguf(&model_path, &device).map_err(|e| {
            FaceveilError::Classification {
                message: format!("load GGUF {}: {e}", model_path.display()),
            }
        })?;
        let model = T5ForConditionalGeneration::load(vb, &config).map_err(|e| {
            FaceveilError::Classification {
                message: format!("init T5 model: {e}"),
            }
        })?;

        let tokenizer =
            Tokenizer::from_file(&tokenizer_path).map_err(|e| FaceveilError::Classification {
                message: format!("load tokenizer: {e}"),
            })?;

        log::info!("consent classifier loaded from {repo_name}");

        Ok(Self {
            model,
            tokenizer,
            device,
            model_name: repo_name.to_string(),
        })
    }

    /// Encodes the prompt and greedily decodes until EOS.
    fn generate(&mut self, prompt: &str) -> Result<String> {
        let classification_err = |message: String| FaceveilError::Classification { message };

        let encoding = self
            .tokenizer
            .encode(prompt, true)
            .map_err(|e| classification_err(format!("tokenize: {e}")))?;

        let input_ids: Vec<u32> = encoding.get_ids().to_vec();
        let input_tensor = Tensor::new(input_ids.as_slice(), &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(|e| classification_err(format!("input tensor: {e}")))?;

        let encoder_output = self
            .model
            .encode(&input_tensor)
            .map_err(|e| classification_err(format!("encoder forward: {e}")))?;

        // Greedy decode; decoder starts from the pad token (id 0).
        let mut output_ids = vec![0u32];
        for step in 0..MAX_DECODE_TOKENS {
            let decoder_tokens: &[u32] = if step == 0 {
                &output_ids
            } else {
                std::slice::from_ref(output_ids.last().unwrap())
            };
            let decoder_input = Tensor::new(decoder_tokens, &self.device)
                .and_then(|t| t.unsqueeze(0))
                .map_err(|e| classification_err(format!("decoder tensor: {e}")))?;

            let logits = self
                .model
                .decode(&decoder_input, &encoder_output)
                .and_then(|logits| logits.squeeze(0))
                .map_err(|e| classification_err(format!("decoder forward: {e}")))?;

            // Logits may be [V] or [S, V] depending on cache state; take the
            // last position's vocab distribution.
            let vocab_logits = match logits.dims().len() {
                1 => logits,
                2 => {
                    let last = logits.dim(0).map_err(|e| {
                        classification_err(format!("logits shape: {e}"))
                    })? - 1;
                    logits
                        .get(last)
                        .map_err(|e| classification_err(format!("logits slice: {e}")))?
                }
                n => {
                    return Err(classification_err(format!("unexpected logits rank {n}")));
                }
            };

            let next_token = vocab_logits
                .argmax(0)
                .and_then(|t| t.to_scalar::<u32>())
                .map_err(|e| classification_err(format!("argmax: {e}")))?;

            if next_token == EOS_TOKEN {
                break;
            }
            output_ids.push(next_token);
        }

        self.tokenizer
            .decode(&output_ids[1..], true)
            .map_err(|e| classification_err(format!("detokenize: {e}")))
    }
}

impl ConsentClassifier for CandleT5Classifier {
    fn classify(&mut self, transcript: &str) -> Result<ConsentVerdict> {
        let trimmed = transcript.trim();
        if trimmed.len() < 3 {
            return Ok(ConsentVerdict::negative());
        }

        self.model.clear_kv_cache();
        let prompt = format!("{PROMPT_PREFIX}{trimmed}");
        let raw_output = self.generate(&prompt)?;
        log::debug!("classifier output: {raw_output:?}");
        parse_verdict(&raw_output)
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}
