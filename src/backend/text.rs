//! CLIP prompt encoding.

use ndarray::{Array2, Array3};
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::Tokenizer;

use crate::error::{Error, Result};
use crate::model::{Device, ModelDir};

use super::tensor::{extract, missing_output};

/// Context length of the CLIP text encoder.
pub const MAX_TOKENS: usize = 77;

/// Tokenizer plus text encoder session.
pub struct TextEncoder {
    tokenizer: Tokenizer,
    session: Session,
}

impl TextEncoder {
    /// Load `tokenizer.json` and `text_encoder/model.onnx` from `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PipelineInit`] if either part is missing or invalid.
    pub fn load(dir: &ModelDir, device: Device) -> Result<Self> {
        let path = dir.file("tokenizer.json")?;
        let tokenizer = Tokenizer::from_file(&path).map_err(|err| Error::PipelineInit {
            name: path.display().to_string(),
            reason: err.to_string(),
        })?;
        let session = dir.session("text_encoder/model.onnx", device)?;

        Ok(Self { tokenizer, session })
    }

    /// Encode `text` to hidden states of shape (1, 77, hidden).
    ///
    /// # Errors
    ///
    /// Returns an error if tokenization or inference fails.
    pub fn encode(&mut self, text: &str) -> Result<Array3<f32>> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|err| Error::invalid_input(format!("prompt could not be tokenized: {err}")))?;

        let ids = encoding
            .get_ids()
            .iter()
            .map(|&id| i32::try_from(id))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|_| Error::invalid_input("token id out of range"))?;

        let ids = Array2::from_shape_vec((1, MAX_TOKENS), fit_context(ids))
            .map_err(|err| super::tensor::shape_error(&err))?;
        let input = Tensor::from_array(ids).map_err(|source| Error::Inference { source })?;

        let outputs = self
            .session
            .run(ort::inputs![input])
            .map_err(|source| Error::Inference { source })?;

        let output = outputs
            .values()
            .next()
            .ok_or_else(|| missing_output("last_hidden_state"))?;

        extract(&output)
    }
}

/// Truncate or pad token ids to [`MAX_TOKENS`].
///
/// The final id (end-of-text) is kept on truncation and repeated as padding.
fn fit_context(mut ids: Vec<i32>) -> Vec<i32> {
    let Some(&end) = ids.last() else {
        return vec![0; MAX_TOKENS];
    };

    if ids.len() > MAX_TOKENS {
        ids.truncate(MAX_TOKENS - 1);
        ids.push(end);
    } else {
        ids.resize(MAX_TOKENS, end);
    }
    ids
}
