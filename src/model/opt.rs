// Location: src/model/opt.rs

//! OPT decoder: learned positions, multi-head attention with bias, ReLU feed-forward.

use candle_core::{DType, Device, IndexOp, Module, Result, Tensor};
use candle_nn::{
    embedding, layer_norm, linear_b, linear_no_bias, Activation, Embedding, LayerNorm, Linear,
    VarBuilder,
};
use serde::Deserialize;

/// Position ids are shifted by this many rows in the position table
const POSITION_OFFSET: usize = 2;
const LAYER_NORM_EPS: f64 = 1e-5;

fn default_true() -> bool {
    true
}

fn default_activation() -> Activation {
    Activation::Relu
}

/// Fields of an OPT `config.json`
#[derive(Debug, Clone, Deserialize)]
pub struct OptConfig {
    pub vocab_size: usize,
    pub hidden_size: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    pub ffn_dim: usize,
    pub max_position_embeddings: usize,
    /// Pre-LN when true, post-LN otherwise
    #[serde(default = "default_true")]
    pub do_layer_norm_before: bool,
    pub word_embed_proj_dim: Option<usize>,
    #[serde(default = "default_activation")]
    pub activation_function: Activation,
    #[serde(default = "default_true")]
    pub enable_bias: bool,
    #[serde(default, rename = "_remove_final_layer_norm")]
    pub remove_final_layer_norm: bool,
}

impl OptConfig {
    fn word_embed_proj_dim(&self) -> usize {
        self.word_embed_proj_dim.unwrap_or(self.hidden_size)
    }

    fn head_dim(&self) -> usize {
        self.hidden_size / self.num_attention_heads
    }
}

/// Keys and values of every layer for one sequence
#[derive(Debug, Clone)]
pub struct OptCache {
    kvs: Vec<Option<(Tensor, Tensor)>>,
}

impl OptCache {
    pub fn new(config: &OptConfig) -> Self {
        Self {
            kvs: vec![None; config.num_hidden_layers],
        }
    }
}

/// Additive mask hiding future positions from a `seq_len` chunk that starts
/// after `past_len` cached positions
fn causal_mask(seq_len: usize, past_len: usize, dtype: DType, device: &Device) -> Result<Tensor> {
    let kv_len = past_len + seq_len;
    let mask: Vec<f32> = (0..seq_len)
        .flat_map(|i| {
            (0..kv_len).map(move |j| if j > past_len + i { f32::NEG_INFINITY } else { 0.0 })
        })
        .collect();
    Tensor::from_slice(&mask, (seq_len, kv_len), device)?.to_dtype(dtype)
}

struct Attention {
    q_proj: Linear,
    k_proj: Linear,
    v_proj: Linear,
    out_proj: Linear,
    num_heads: usize,
    head_dim: usize,
    scaling: f64,
}

impl Attention {
    fn load(vb: VarBuilder, cfg: &OptConfig) -> Result<Self> {
        let hidden = cfg.hidden_size;
        let head_dim = cfg.head_dim();
        Ok(Self {
            q_proj: linear_b(hidden, hidden, cfg.enable_bias, vb.pp("q_proj"))?,
            k_proj: linear_b(hidden, hidden, cfg.enable_bias, vb.pp("k_proj"))?,
            v_proj: linear_b(hidden, hidden, cfg.enable_bias, vb.pp("v_proj"))?,
            out_proj: linear_b(hidden, hidden, cfg.enable_bias, vb.pp("out_proj"))?,
            num_heads: cfg.num_attention_heads,
            head_dim,
            scaling: (head_dim as f64).powf(-0.5),
        })
    }

    fn forward(
        &self,
        xs: &Tensor,
        mask: Option<&Tensor>,
        kv: &mut Option<(Tensor, Tensor)>,
    ) -> Result<Tensor> {
        let (b_sz, seq_len, _) = xs.dims3()?;
        let shape = (b_sz, seq_len, self.num_heads, self.head_dim);

        let q = (self.q_proj.forward(xs)? * self.scaling)?
            .reshape(shape)?
            .transpose(1, 2)?
            .contiguous()?;
        let mut k = self.k_proj.forward(xs)?.reshape(shape)?.transpose(1, 2)?.contiguous()?;
        let mut v = self.v_proj.forward(xs)?.reshape(shape)?.transpose(1, 2)?.contiguous()?;

        if let Some((past_k, past_v)) = kv.as_ref() {
            k = Tensor::cat(&[past_k, &k], 2)?.contiguous()?;
            v = Tensor::cat(&[past_v, &v], 2)?.contiguous()?;
        }
        *kv = Some((k.clone(), v.clone()));

        let att = q.matmul(&k.t()?)?;
        let att = match mask {
            Some(mask) => att.broadcast_add(mask)?,
            None => att,
        };
        let att = candle_nn::ops::softmax_last_dim(&att.to_dtype(DType::F32)?)?.to_dtype(v.dtype())?;

        let ys = att
            .matmul(&v)?
            .transpose(1, 2)?
            .reshape((b_sz, seq_len, self.num_heads * self.head_dim))?;
        self.out_proj.forward(&ys)
    }
}

struct DecoderLayer {
    self_attn: Attention,
    self_attn_layer_norm: LayerNorm,
    fc1: Linear,
    fc2: Linear,
    final_layer_norm: LayerNorm,
    activation: Activation,
    pre_norm: bool,
}

impl DecoderLayer {
    fn load(vb: VarBuilder, cfg: &OptConfig) -> Result<Self> {
        let hidden = cfg.hidden_size;
        Ok(Self {
            self_attn: Attention::load(vb.pp("self_attn"), cfg)?,
            self_attn_layer_norm: layer_norm(hidden, LAYER_NORM_EPS, vb.pp("self_attn_layer_norm"))?,
            fc1: linear_b(hidden, cfg.ffn_dim, cfg.enable_bias, vb.pp("fc1"))?,
            fc2: linear_b(cfg.ffn_dim, hidden, cfg.enable_bias, vb.pp("fc2"))?,
            final_layer_norm: layer_norm(hidden, LAYER_NORM_EPS, vb.pp("final_layer_norm"))?,
            activation: cfg.activation_function,
            pre_norm: cfg.do_layer_norm_before,
        })
    }

    fn forward(
        &self,
        xs: &Tensor,
        mask: Option<&Tensor>,
        kv: &mut Option<(Tensor, Tensor)>,
    ) -> Result<Tensor> {
        let residual = xs;
        let hidden = if self.pre_norm {
            self.self_attn_layer_norm.forward(xs)?
        } else {
            xs.clone()
        };
        let mut hidden = (self.self_attn.forward(&hidden, mask, kv)? + residual)?;
        if !self.pre_norm {
            hidden = self.self_attn_layer_norm.forward(&hidden)?;
        }

        let residual = &hidden;
        let ff = if self.pre_norm {
            self.final_layer_norm.forward(&hidden)?
        } else {
            hidden.clone()
        };
        let ff = self.fc2.forward(&self.fc1.forward(&ff)?.apply(&self.activation)?)?;
        let mut out = (ff + residual)?;
        if !self.pre_norm {
            out = self.final_layer_norm.forward(&out)?;
        }
        Ok(out)
    }
}

pub struct Opt {
    embed_tokens: Embedding,
    embed_positions: Embedding,
    project_in: Option<Linear>,
    project_out: Option<Linear>,
    layers: Vec<DecoderLayer>,
    final_layer_norm: Option<LayerNorm>,
    lm_head: Linear,
}

impl Opt {
    pub fn load(vb: VarBuilder, cfg: &OptConfig) -> Result<Self> {
        // Hub checkpoints keep the decoder either under `model.` or at the root
        let vb_d = if vb.contains_tensor("model.decoder.embed_tokens.weight") {
            vb.pp("model").pp("decoder")
        } else {
            vb.pp("decoder")
        };

        let hidden = cfg.hidden_size;
        let proj_dim = cfg.word_embed_proj_dim();
        let embed_tokens = embedding(cfg.vocab_size, proj_dim, vb_d.pp("embed_tokens"))?;
        let embed_positions = embedding(
            cfg.max_position_embeddings + POSITION_OFFSET,
            hidden,
            vb_d.pp("embed_positions"),
        )?;

        let (project_in, project_out) = if proj_dim != hidden {
            (
                Some(linear_no_bias(proj_dim, hidden, vb_d.pp("project_in"))?),
                Some(linear_no_bias(hidden, proj_dim, vb_d.pp("project_out"))?),
            )
        } else {
            (None, None)
        };

        let layers = (0..cfg.num_hidden_layers)
            .map(|i| DecoderLayer::load(vb_d.pp(format!("layers.{i}")), cfg))
            .collect::<Result<Vec<_>>>()?;

        let final_layer_norm = if cfg.do_layer_norm_before && !cfg.remove_final_layer_norm {
            Some(layer_norm(hidden, LAYER_NORM_EPS, vb_d.pp("final_layer_norm"))?)
        } else {
            None
        };

        // The output projection is tied to the token embeddings
        let lm_head = Linear::new(embed_tokens.embeddings().clone(), None);

        Ok(Self {
            embed_tokens,
            embed_positions,
            project_in,
            project_out,
            layers,
            final_layer_norm,
            lm_head,
        })
    }

    /// Logits for the last position of each row of `input`, shape `(batch, vocab)`
    pub fn forward(&self, input: &Tensor, index_pos: usize, cache: &mut OptCache) -> Result<Tensor> {
        let (_b_sz, seq_len) = input.dims2()?;
        let device = input.device();

        let mut xs = self.embed_tokens.forward(input)?;
        if let Some(project_in) = &self.project_in {
            xs = project_in.forward(&xs)?;
        }

        let first = (index_pos + POSITION_OFFSET) as u32;
        let positions = Tensor::arange(first, first + seq_len as u32, device)?;
        xs = xs.broadcast_add(&self.embed_positions.forward(&positions)?)?;

        let mask = if seq_len > 1 {
            Some(causal_mask(seq_len, index_pos, xs.dtype(), device)?)
        } else {
            None
        };
        for (layer, kv) in self.layers.iter().zip(cache.kvs.iter_mut()) {
            xs = layer.forward(&xs, mask.as_ref(), kv)?;
        }

        let mut xs = xs.i((.., seq_len - 1, ..))?.contiguous()?;
        if let Some(norm) = &self.final_layer_norm {
            xs = norm.forward(&xs)?;
        }
        if let Some(project_out) = &self.project_out {
            xs = project_out.forward(&xs)?;
        }
        self.lm_head.forward(&xs)?.to_dtype(DType::F32)
    }
}
