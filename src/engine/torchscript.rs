//! Single-model TorchScript backend. Serves a traced causal language model and
//! emits one cumulative [`RequestOutput`] per generated token.

use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use futures::{StreamExt, stream};
use parking_lot::Mutex;
use tch::{Device, IValue, Kind, Tensor, no_grad};
use tokenizers::Tokenizer;
use tokio::{sync::mpsc, task};
use tracing::{debug, info};

use crate::{
    engine::{
        CompletionOutput, EngineArgs, InferenceEngine, LoraRequest, OutputStream, RequestOutput,
        SamplingParams, TokenId,
        decoding::{ensure_no_adapter, evaluate_step, token_budget},
    },
    error::ServiceError,
};

const EOS_CANDIDATES: [&str; 3] = ["<|endoftext|>", "</s>", "<eos>"];

type OutputSender = mpsc::UnboundedSender<Result<RequestOutput, ServiceError>>;

pub struct TorchScriptEngine {
    instance: Arc<ModelInstance>,
}

struct ModelInstance {
    args: EngineArgs,
    device: Device,
    tokenizer: Tokenizer,
    eos_token_id: Option<TokenId>,
    module: Mutex<tch::CModule>,
}

impl TorchScriptEngine {
    pub fn from_engine_args(args: EngineArgs, device: Device) -> Result<Self, ServiceError> {
        let module_path = PathBuf::from(&args.model);
        if !module_path.is_file() {
            return Err(ServiceError::Config(format!(
                "model artifact missing: {}",
                module_path.display()
            )));
        }

        let tokenizer_path = args
            .tokenizer
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| module_path.with_file_name("tokenizer.json"));
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| ServiceError::Tokenizer(e.to_string()))?;
        let eos_token_id = EOS_CANDIDATES
            .iter()
            .find_map(|token| tokenizer.token_to_id(token));

        tch::manual_seed(args.seed as i64);
        let mut module = tch::CModule::load_on_device(&module_path, device)
            .map_err(|e| ServiceError::Inference(e.to_string()))?;
        module.set_eval();

        info!(
            model = %module_path.display(),
            tokenizer = %tokenizer_path.display(),
            ?device,
            ?eos_token_id,
            "torchscript engine ready"
        );

        Ok(Self {
            instance: Arc::new(ModelInstance {
                args,
                device,
                tokenizer,
                eos_token_id,
                module: Mutex::new(module),
            }),
        })
    }
}

#[async_trait]
impl InferenceEngine for TorchScriptEngine {
    async fn generate(
        &self,
        prompt: String,
        params: SamplingParams,
        request_id: String,
        lora: Option<LoraRequest>,
    ) -> Result<OutputStream, ServiceError> {
        ensure_no_adapter(lora.as_ref(), "torchscript")?;

        let (tx, rx) = mpsc::unbounded_channel();
        let instance = self.instance.clone();
        task::spawn_blocking(move || {
            if let Err(err) = instance.run(&prompt, &params, &request_id, &tx) {
                let _ = tx.send(Err(err));
            }
        });

        Ok(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed())
    }
}

impl ModelInstance {
    fn run(
        &self,
        prompt: &str,
        params: &SamplingParams,
        request_id: &str,
        tx: &OutputSender,
    ) -> Result<(), ServiceError> {
        let encoding = self
            .tokenizer
            .encode(prompt, true)
            .map_err(|e| ServiceError::Tokenizer(e.to_string()))?;
        let mut input_ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
        if input_ids.is_empty() {
            input_ids.push(0);
        }
        let prompt_token_len = input_ids.len();

        let max_tokens = token_budget(params, self.args.max_model_len, prompt_token_len);

        if let Some(seed) = params.seed {
            tch::manual_seed(seed as i64);
        }

        let emit = |text: String, token_ids: Vec<TokenId>, finish_reason: Option<&str>| {
            let output = RequestOutput {
                request_id: request_id.to_string(),
                prompt: prompt.to_string(),
                outputs: vec![CompletionOutput {
                    index: 0,
                    text,
                    token_ids,
                    finish_reason: finish_reason.map(str::to_string),
                }],
                finished: finish_reason.is_some(),
            };
            tx.send(Ok(output)).is_ok()
        };

        if max_tokens == 0 {
            emit(String::new(), Vec::new(), Some("length"));
            return Ok(());
        }

        no_grad(|| {
            let module = self.module.lock();
            let mut generated: Vec<TokenId> = Vec::with_capacity(max_tokens);
            let mut visible = 0;

            loop {
                let input_tensor = Tensor::from_slice(&input_ids)
                    .reshape([1, input_ids.len() as i64])
                    .to(self.device);

                let output = module
                    .forward_is(&[IValue::Tensor(input_tensor)])
                    .map_err(|e| ServiceError::Inference(e.to_string()))?;

                let logits = match output {
                    IValue::Tensor(t) => t,
                    IValue::Tuple(ref tuple) if !tuple.is_empty() => match &tuple[0] {
                        IValue::Tensor(t) => t.shallow_clone(),
                        _ => {
                            return Err(ServiceError::Inference(
                                "expected tensor as first tuple element".into(),
                            ));
                        }
                    },
                    _ => {
                        return Err(ServiceError::Inference(
                            "unexpected model output format".into(),
                        ));
                    }
                };

                // [1, seq_len, vocab] -> [vocab]
                let last_logits = logits.select(1, -1).squeeze();
                let next_token_id = sample(&last_logits, params);
                input_ids.push(next_token_id);
                generated.push(next_token_id as TokenId);

                let mut text = self
                    .tokenizer
                    .decode(&generated, params.skip_special_tokens)
                    .map_err(|e| ServiceError::Tokenizer(e.to_string()))?;

                let step = evaluate_step(
                    params,
                    self.eos_token_id,
                    &generated,
                    &text,
                    max_tokens,
                    visible,
                );
                visible = step.visible;
                text.truncate(step.visible);
                let finish_reason = step.finish_reason;

                if !emit(text, generated.clone(), finish_reason) {
                    debug!(request_id, "output receiver dropped; stopping generation");
                    return Ok(());
                }
                if finish_reason.is_some() {
                    return Ok(());
                }
            }
        })
    }
}

fn sample(logits: &Tensor, params: &SamplingParams) -> i64 {
    if params.temperature <= 0.0 {
        return logits.argmax(0, false).int64_value(&[]);
    }

    let scaled = logits / f64::from(params.temperature);
    let vocab = scaled.size().last().copied().unwrap_or(1);
    if params.top_k > 0 && i64::from(params.top_k) < vocab {
        let (values, indices) = scaled.topk(i64::from(params.top_k), -1, true, true);
        let choice = values
            .softmax(-1, Kind::Float)
            .multinomial(1, false)
            .int64_value(&[0]);
        return indices.int64_value(&[choice]);
    }

    scaled
        .softmax(-1, Kind::Float)
        .multinomial(1, false)
        .int64_value(&[0])
}
