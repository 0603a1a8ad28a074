//! Backend-independent decoding rules: how many tokens a request may produce,
//! when generation finishes, and how much of the running text may be shown.
//!
//! Text that could be the start of a stop string is held back until it either
//! completes the stop string (and is cut) or stops matching, so the visible
//! text of successive events only ever grows.

use crate::{
    engine::{LoraRequest, SamplingParams, TokenId},
    error::ServiceError,
};

/// Tokens a request may generate.
pub fn token_budget(
    params: &SamplingParams,
    max_model_len: Option<usize>,
    prompt_tokens: usize,
) -> usize {
    match (params.max_tokens, max_model_len) {
        (Some(max), _) => max,
        (None, Some(limit)) => limit.saturating_sub(prompt_tokens),
        (None, None) => SamplingParams::default().max_tokens.unwrap_or(16),
    }
}

/// Outcome of one decoding step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    /// Byte length of the text prefix that may be emitted.
    pub visible: usize,
    pub finish_reason: Option<&'static str>,
}

/// Decides whether generation ends after the last token of `generated`.
///
/// `text` is the decoded text of all generated tokens and `visible_before` the
/// visible length reported for the previous step.
pub fn evaluate_step(
    params: &SamplingParams,
    eos_token_id: Option<TokenId>,
    generated: &[TokenId],
    text: &str,
    budget: usize,
    visible_before: usize,
) -> Step {
    let past_min = generated.len() >= params.min_tokens;

    let stops_on_token = past_min
        && generated.last().is_some_and(|&token| {
            (!params.ignore_eos && Some(token) == eos_token_id)
                || params.stop_token_ids.contains(&token)
        });
    if stops_on_token {
        return Step {
            visible: text.len(),
            finish_reason: Some("stop"),
        };
    }

    if past_min {
        let stop_at = params
            .stop
            .iter()
            .filter(|s| !s.is_empty())
            .filter_map(|s| text.find(s.as_str()))
            .min();
        if let Some(pos) = stop_at {
            return Step {
                visible: char_floor(text, pos.max(visible_before)),
                finish_reason: Some("stop"),
            };
        }
    }

    if generated.len() >= budget {
        return Step {
            visible: text.len(),
            finish_reason: Some("length"),
        };
    }

    let held = held_back(text, &params.stop);
    Step {
        visible: char_floor(text, (text.len() - held).max(visible_before)),
        finish_reason: None,
    }
}

/// Fails when an adapter is requested from a backend that cannot apply one.
pub fn ensure_no_adapter(lora: Option<&LoraRequest>, backend: &str) -> Result<(), ServiceError> {
    match lora {
        Some(lora) => Err(ServiceError::Inference(format!(
            "adapter {} (id {}) requested but the {backend} backend cannot apply adapters",
            lora.name, lora.id
        ))),
        None => Ok(()),
    }
}

/// Length of the longest suffix of `text` that is a proper prefix of a stop string.
fn held_back(text: &str, stops: &[String]) -> usize {
    let longest = stops.iter().map(String::len).max().unwrap_or(0);
    let start = text.len().saturating_sub(longest);

    text.char_indices()
        .map(|(idx, _)| idx)
        .filter(|&idx| idx >= start)
        .find(|&idx| {
            let tail = &text[idx..];
            stops
                .iter()
                .any(|stop| stop.len() > tail.len() && stop.starts_with(tail))
        })
        .map_or(0, |idx| text.len() - idx)
}

fn char_floor(text: &str, idx: usize) -> usize {
    let mut idx = idx.min(text.len());
    while !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}
