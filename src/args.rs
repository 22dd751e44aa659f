use std::io::{Read, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use crate::binio;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ModelName {
    Cbow = 1,
    Sg = 2,
    Sup = 3,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LossName {
    Hs = 1,
    Ns = 2,
    Softmax = 3,
    Ova = 4,
}

impl ModelName {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelName::Cbow => "cbow",
            ModelName::Sg => "sg",
            ModelName::Sup => "sup",
        }
    }

    fn from_i32(v: i32) -> Result<ModelName> {
        Ok(match v {
            1 => ModelName::Cbow,
            2 => ModelName::Sg,
            3 => ModelName::Sup,
            _ => bail!("unknown model id {v} in model file"),
        })
    }
}

impl LossName {
    pub fn as_str(self) -> &'static str {
        match self {
            LossName::Hs => "hs",
            LossName::Ns => "ns",
            LossName::Softmax => "softmax",
            LossName::Ova => "one-vs-all",
        }
    }

    fn from_i32(v: i32) -> Result<LossName> {
        Ok(match v {
            1 => LossName::Hs,
            2 => LossName::Ns,
            3 => LossName::Softmax,
            4 => LossName::Ova,
            _ => bail!("unknown loss id {v} in model file"),
        })
    }
}

/// Hyperparameters of a training run.
///
/// Persisted inside the model file; only the fields that affect inference
/// are serialized (paths, verbosity and quantization knobs are not).
#[derive(Clone, Debug)]
pub struct Args {
    pub input: PathBuf,
    pub output: PathBuf,

    pub lr: f64,
    pub lr_update_rate: i32,
    pub dim: i32,
    pub ws: i32,
    pub epoch: i32,
    pub min_count: i64,
    pub min_count_label: i64,
    pub neg: i32,
    pub word_ngrams: i32,
    pub loss: LossName,
    pub model: ModelName,
    pub bucket: i32,
    pub minn: i32,
    pub maxn: i32,
    pub thread: i32,
    pub t: f64,
    pub label: String,
    pub verbose: i32,
    pub pretrained_vectors: Option<PathBuf>,
    pub save_output: bool,

    pub qout: bool,
    pub retrain: bool,
    pub qnorm: bool,
    pub cutoff: i64,
    pub dsub: i32,
}

impl Default for Args {
    fn default() -> Args {
        Args {
            input: PathBuf::new(),
            output: PathBuf::new(),
            lr: 0.05,
            lr_update_rate: 100,
            dim: 100,
            ws: 5,
            epoch: 5,
            min_count: 5,
            min_count_label: 0,
            neg: 5,
            word_ngrams: 1,
            loss: LossName::Ns,
            model: ModelName::Sg,
            bucket: 2_000_000,
            minn: 3,
            maxn: 6,
            thread: 12,
            t: 1e-4,
            label: "__label__".to_string(),
            verbose: 2,
            pretrained_vectors: None,
            save_output: false,
            qout: false,
            retrain: false,
            qnorm: false,
            cutoff: 0,
            dsub: 2,
        }
    }
}

impl Args {
    /// Defaults for the `supervised` command.
    pub fn supervised() -> Args {
        Args {
            model: ModelName::Sup,
            loss: LossName::Softmax,
            min_count: 1,
            minn: 0,
            maxn: 0,
            lr: 0.1,
            ..Args::default()
        }
    }

    /// Defaults for the `cbow` command.
    pub fn cbow() -> Args {
        Args {
            model: ModelName::Cbow,
            ..Args::default()
        }
    }

    /// Defaults for the `skipgram` command.
    pub fn skipgram() -> Args {
        Args::default()
    }

    /// The bucket table is only needed when subword or word n-gram hashing
    /// is in play; drop it otherwise.
    pub fn resolve(&mut self) {
        if self.word_ngrams <= 1 && self.maxn == 0 {
            self.bucket = 0;
        }
    }

    pub fn save<W: Write>(&self, w: &mut W) -> Result<()> {
        binio::write_i32(w, self.dim)?;
        binio::write_i32(w, self.ws)?;
        binio::write_i32(w, self.epoch)?;
        binio::write_i32(w, self.min_count as i32)?;
        binio::write_i32(w, self.neg)?;
        binio::write_i32(w, self.word_ngrams)?;
        binio::write_i32(w, self.loss as i32)?;
        binio::write_i32(w, self.model as i32)?;
        binio::write_i32(w, self.bucket)?;
        binio::write_i32(w, self.minn)?;
        binio::write_i32(w, self.maxn)?;
        binio::write_i32(w, self.lr_update_rate)?;
        binio::write_f64(w, self.t)?;
        Ok(())
    }

    pub fn load<R: Read>(r: &mut R) -> Result<Args> {
        let mut args = Args::default();
        args.dim = binio::read_i32(r)?;
        args.ws = binio::read_i32(r)?;
        args.epoch = binio::read_i32(r)?;
        args.min_count = binio::read_i32(r)? as i64;
        args.neg = binio::read_i32(r)?;
        args.word_ngrams = binio::read_i32(r)?;
        args.loss = LossName::from_i32(binio::read_i32(r)?).context("error reading model file")?;
        args.model = ModelName::from_i32(binio::read_i32(r)?).context("error reading model file")?;
        args.bucket = binio::read_i32(r)?;
        args.minn = binio::read_i32(r)?;
        args.maxn = binio::read_i32(r)?;
        args.lr_update_rate = binio::read_i32(r)?;
        args.t = binio::read_f64(r)?;
        Ok(args)
    }

    pub fn dump<W: Write>(&self, w: &mut W) -> Result<()> {
        writeln!(w, "dim {}", self.dim)?;
        writeln!(w, "ws {}", self.ws)?;
        writeln!(w, "epoch {}", self.epoch)?;
        writeln!(w, "minCount {}", self.min_count)?;
        writeln!(w, "neg {}", self.neg)?;
        writeln!(w, "wordNgrams {}", self.word_ngrams)?;
        writeln!(w, "loss {}", self.loss.as_str())?;
        writeln!(w, "model {}", self.model.as_str())?;
        writeln!(w, "bucket {}", self.bucket)?;
        writeln!(w, "minn {}", self.minn)?;
        writeln!(w, "maxn {}", self.maxn)?;
        writeln!(w, "lrUpdateRate {}", self.lr_update_rate)?;
        writeln!(w, "t {}", self.t)?;
        Ok(())
    }
}
