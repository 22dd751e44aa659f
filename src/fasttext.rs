use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::mem;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, ensure, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use ordered_float::OrderedFloat;

use crate::args::{Args, LossName, ModelName};
use crate::binio;
use crate::dictionary::{self, Dictionary, EntryType, TokenReader, EOS};
use crate::loss::{Loss, Predictions};
use crate::matrix::{DenseMatrix, Matrix, QuantMatrix, Real};
use crate::meter::Meter;
use crate::model::{Model, State, K_ALL_LABELS_AS_TARGET};
use crate::vector::Vector;

const FASTTEXT_VERSION: i32 = 12; /* Version 1b */
const FASTTEXT_FILEFORMAT_MAGIC: i32 = 793712314;

/// A training/inference session: dictionary, weight matrices, loss, and the
/// multi-threaded trainer that binds them together.
pub struct FastText {
    args: Args,
    dict: Dictionary,
    input: Matrix,
    output: Matrix,
    loss: Loss,
    quant: bool,
    version: i32,
    word_vectors: Option<DenseMatrix>,
    token_count: AtomicU64,
    shown_loss: Real,
    start: Instant,
}

impl std::fmt::Debug for FastText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastText")
            .field("quant", &self.quant)
            .field("version", &self.version)
            .field("token_count", &self.token_count)
            .finish_non_exhaustive()
    }
}

fn create_loss(args: &Args, dict: &Dictionary) -> Loss {
    let counts = if args.model == ModelName::Sup {
        dict.get_counts(EntryType::Label)
    } else {
        dict.get_counts(EntryType::Word)
    };
    match args.loss {
        LossName::Hs => Loss::hierarchical_softmax(&counts),
        LossName::Ns => Loss::negative_sampling(args.neg, &counts),
        LossName::Softmax => Loss::softmax(),
        LossName::Ova => Loss::one_vs_all(),
    }
}

/// Cosine-similarity scan over the precomputed word vectors, skipping the
/// banned query words.
fn find_nn(
    dict: &Dictionary,
    word_vectors: &DenseMatrix,
    query: &Vector,
    k: i32,
    ban_set: &[&str],
) -> Result<Vec<(f32, String)>> {
    let mut query_norm = query.norm();
    if query_norm.abs() < 1e-8 {
        query_norm = 1.0;
    }

    let mut best: Vec<(f32, &str)> = Vec::with_capacity(dict.nwords() as usize);
    for i in 0..dict.nwords() {
        let word = dict.get_word(i);
        if ban_set.contains(&word) {
            continue;
        }
        let dp = word_vectors.dot_row(query.as_slice(), i as usize)?;
        best.push((dp / query_norm, word));
    }
    best.sort_by_key(|&(similarity, _)| Reverse(OrderedFloat(similarity)));
    best.truncate(k.max(0) as usize);
    Ok(best
        .into_iter()
        .map(|(similarity, word)| (similarity, word.to_string()))
        .collect())
}

impl FastText {
    /// Builds the dictionary from the corpus, initializes the matrices and
    /// loss, and runs the multi-threaded training loop to completion.
    pub fn train(mut args: Args) -> Result<FastText> {
        args.resolve();
        ensure!(
            args.input != Path::new("-"),
            "Cannot use stdin for training!"
        );
        let file = File::open(&args.input)
            .with_context(|| format!("{} cannot be opened for training!", args.input.display()))?;
        let mut reader = TokenReader::new(file)?;
        let mut dict = Dictionary::new(&args);
        dict.read_from_file(&mut reader)?;

        let input = match args.pretrained_vectors.clone() {
            Some(path) => input_matrix_from_file(&args, &mut dict, &path)?,
            None => {
                let m = DenseMatrix::new(
                    (dict.nwords() + args.bucket) as usize,
                    args.dim as usize,
                );
                m.uniform(1.0 / args.dim as f32);
                m
            }
        };

        let output_rows = if args.model == ModelName::Sup {
            dict.nlabels()
        } else {
            dict.nwords()
        } as usize;
        let output = DenseMatrix::new(output_rows, args.dim as usize);
        output.zero();

        let loss = create_loss(&args, &dict);
        let mut ft = FastText {
            args,
            dict,
            input: Matrix::Dense(input),
            output: Matrix::Dense(output),
            loss,
            quant: false,
            version: FASTTEXT_VERSION,
            word_vectors: None,
            token_count: AtomicU64::new(0),
            shown_loss: Real::default(),
            start: Instant::now(),
        };
        ft.start_threads()?;
        Ok(ft)
    }

    pub fn args(&self) -> &Args {
        &self.args
    }

    pub fn dictionary(&self) -> &Dictionary {
        &self.dict
    }

    pub fn get_dimension(&self) -> i32 {
        self.args.dim
    }

    pub fn is_quant(&self) -> bool {
        self.quant
    }

    /// File-format version this model was loaded from (or written with).
    pub fn version(&self) -> i32 {
        self.version
    }

    pub fn input_matrix(&self) -> Result<&DenseMatrix> {
        ensure!(!self.quant, "Can't export quantized matrix");
        self.input.as_dense().context("input matrix is not dense")
    }

    pub fn output_matrix(&self) -> Result<&DenseMatrix> {
        ensure!(
            !(self.quant && self.args.qout),
            "Can't export quantized matrix"
        );
        self.output.as_dense().context("output matrix is not dense")
    }

    fn model(&self) -> Model<'_> {
        Model::new(
            &self.input,
            &self.output,
            &self.loss,
            self.args.model == ModelName::Sup,
        )
    }

    /// Spawns the worker pool and polls the shared token counter to drive
    /// the progress display until the token target is reached.
    fn start_threads(&mut self) -> Result<()> {
        self.start = Instant::now();
        self.token_count.store(0, Ordering::Relaxed);
        self.shown_loss.set(-1.0);

        let target = self.args.epoch as u64 * self.dict.ntokens() as u64;
        let nthreads = self.args.thread.max(1) as usize;

        let pb = if self.args.verbose > 1 {
            let pb = ProgressBar::new(target);
            pb.set_style(ProgressStyle::with_template(
                "Progress: {percent:>3}% {bar:30} {msg} ETA: {eta}",
            )?);
            pb
        } else {
            ProgressBar::hidden()
        };

        thread::scope(|s| -> Result<()> {
            let this: &FastText = self;
            let handles: Vec<_> = (0..nthreads)
                .map(|i| s.spawn(move || this.train_thread(i)))
                .collect();

            loop {
                let tokens = this.token_count.load(Ordering::Relaxed);
                if tokens >= target || handles.iter().all(|h| h.is_finished()) {
                    break;
                }
                thread::sleep(Duration::from_millis(100));

                let tokens = this.token_count.load(Ordering::Relaxed).min(target);
                pb.set_position(tokens);
                let progress = tokens as f64 / target as f64;
                let lr = this.args.lr * (1.0 - progress);
                let loss = this.shown_loss.get();
                if loss >= 0.0 {
                    let wst = tokens as f64
                        / this.start.elapsed().as_secs_f64().max(1e-9)
                        / nthreads as f64;
                    pb.set_message(format!(
                        "words/sec/thread: {wst:7.0} lr: {lr:9.6} loss: {loss:9.6}"
                    ));
                }
            }

            for handle in handles {
                match handle.join() {
                    Ok(result) => result?,
                    Err(_) => bail!("training worker panicked"),
                }
            }
            Ok(())
        })?;

        pb.finish_and_clear();
        if self.args.verbose > 0 {
            eprintln!("Progress: 100.0%  loss: {:.6}", self.shown_loss.get());
        }
        Ok(())
    }

    /// One worker: reads lines starting at a private byte offset and applies
    /// per-line updates until the global token target is reached, folding
    /// its local token count into the shared counter on a cadence.
    fn train_thread(&self, id: usize) -> Result<()> {
        let file = File::open(&self.args.input).with_context(|| {
            format!("{} cannot be opened for training!", self.args.input.display())
        })?;
        let mut reader = TokenReader::new(file)?;
        let nthreads = self.args.thread.max(1) as u64;
        reader.seek(id as u64 * reader.len() / nthreads)?;

        let mut state = State::new(self.args.dim as usize, self.output.rows(), id as u64);
        let model = self.model();

        let target = self.args.epoch as u64 * self.dict.ntokens() as u64;
        let mut local_token_count: i64 = 0;
        let mut line: Vec<i32> = Vec::new();
        let mut labels: Vec<i32> = Vec::new();

        while self.token_count.load(Ordering::Relaxed) < target {
            let progress = self.token_count.load(Ordering::Relaxed) as f32 / target as f32;
            let lr = self.args.lr as f32 * (1.0 - progress);

            match self.args.model {
                ModelName::Sup => {
                    local_token_count +=
                        self.dict
                            .get_line_labels(&mut reader, &mut line, &mut labels)?
                            as i64;
                    self.supervised(&model, &mut state, lr, &line, &labels)?;
                }
                ModelName::Cbow => {
                    local_token_count +=
                        self.dict.get_line(&mut reader, &mut line, &mut state.rng)? as i64;
                    self.cbow(&model, &mut state, lr, &line)?;
                }
                ModelName::Sg => {
                    local_token_count +=
                        self.dict.get_line(&mut reader, &mut line, &mut state.rng)? as i64;
                    self.skipgram(&model, &mut state, lr, &line)?;
                }
            }

            if local_token_count > self.args.lr_update_rate as i64 {
                self.token_count
                    .fetch_add(local_token_count as u64, Ordering::Relaxed);
                local_token_count = 0;
                if id == 0 && self.args.verbose > 1 {
                    self.shown_loss.set(state.loss());
                }
            }
        }
        if id == 0 {
            self.shown_loss.set(state.loss());
        }
        Ok(())
    }

    fn supervised(
        &self,
        model: &Model<'_>,
        state: &mut State,
        lr: f32,
        line: &[i32],
        labels: &[i32],
    ) -> Result<()> {
        if labels.is_empty() || line.is_empty() {
            return Ok(());
        }
        if self.args.loss == LossName::Ova {
            model.update(line, labels, K_ALL_LABELS_AS_TARGET, lr, state)
        } else {
            let i = state.rng.below(labels.len()) as i32;
            model.update(line, labels, i, lr, state)
        }
    }

    fn cbow(&self, model: &Model<'_>, state: &mut State, lr: f32, line: &[i32]) -> Result<()> {
        let mut bow: Vec<i32> = Vec::new();
        for w in 0..line.len() {
            let boundary = state.rng.uniform(1, self.args.ws as usize) as isize;
            bow.clear();
            for c in -boundary..=boundary {
                let pos = w as isize + c;
                if c != 0 && pos >= 0 && (pos as usize) < line.len() {
                    bow.extend_from_slice(self.dict.get_subwords(line[pos as usize]));
                }
            }
            model.update(&bow, line, w as i32, lr, state)?;
        }
        Ok(())
    }

    fn skipgram(&self, model: &Model<'_>, state: &mut State, lr: f32, line: &[i32]) -> Result<()> {
        for w in 0..line.len() {
            let boundary = state.rng.uniform(1, self.args.ws as usize) as isize;
            let ngrams = self.dict.get_subwords(line[w]);
            for c in -boundary..=boundary {
                let pos = w as isize + c;
                if c != 0 && pos >= 0 && (pos as usize) < line.len() {
                    model.update(ngrams, line, pos as i32, lr, state)?;
                }
            }
        }
        Ok(())
    }

    pub fn get_word_id(&self, word: &str) -> i32 {
        self.dict.get_id(word)
    }

    pub fn get_subword_id(&self, subword: &str) -> i32 {
        let h = dictionary::hash(subword) % self.args.bucket as u32;
        self.dict.nwords() + h as i32
    }

    fn add_input_vector(&self, vec: &mut Vector, ind: i32) {
        vec.add_row(&self.input, ind as usize);
    }

    /// Mean of the word's subword rows (works for out-of-vocabulary words
    /// through their char-ngrams alone).
    pub fn get_word_vector(&self, vec: &mut Vector, word: &str) {
        let ngrams = self.dict.get_subwords_of(word);
        vec.zero();
        for &i in &ngrams {
            self.add_input_vector(vec, i);
        }
        if !ngrams.is_empty() {
            vec.mul(1.0 / ngrams.len() as f32);
        }
    }

    pub fn get_subword_vector(&self, vec: &mut Vector, subword: &str) {
        vec.zero();
        self.add_input_vector(vec, self.get_subword_id(subword));
    }

    pub fn get_input_vector(&self, vec: &mut Vector, ind: i32) {
        vec.zero();
        self.add_input_vector(vec, ind);
    }

    /// Supervised: mean of the line's token rows. Unsupervised: mean of the
    /// norm-normalized word vectors of the line.
    pub fn get_sentence_vector<R: Read + Seek>(
        &self,
        reader: &mut TokenReader<R>,
        svec: &mut Vector,
    ) -> Result<()> {
        svec.zero();
        if self.args.model == ModelName::Sup {
            let mut line = Vec::new();
            let mut labels = Vec::new();
            self.dict.get_line_labels(reader, &mut line, &mut labels)?;
            for &i in &line {
                self.add_input_vector(svec, i);
            }
            if !line.is_empty() {
                svec.mul(1.0 / line.len() as f32);
            }
        } else {
            let mut vec = Vector::new(self.args.dim as usize);
            let mut count = 0;
            while let Some(word) = reader.read_word()? {
                if word == EOS {
                    break;
                }
                self.get_word_vector(&mut vec, &word);
                let norm = vec.norm();
                if norm > 0.0 {
                    vec.mul(1.0 / norm);
                    svec.add_vector(&vec);
                    count += 1;
                }
            }
            if count > 0 {
                svec.mul(1.0 / count as f32);
            }
        }
        Ok(())
    }

    /// The word's ngram substrings with their input vectors.
    pub fn get_ngram_vectors(&self, word: &str) -> Vec<(String, Vector)> {
        let (ngrams, substrings) = self.dict.get_subwords_with_strings(word);
        ngrams
            .into_iter()
            .zip(substrings)
            .map(|(id, substring)| {
                let mut vec = Vector::new(self.args.dim as usize);
                if id >= 0 {
                    vec.add_row(&self.input, id as usize);
                }
                (substring, vec)
            })
            .collect()
    }

    fn ensure_word_vectors(&mut self) -> Result<()> {
        if self.word_vectors.is_none() {
            let word_vectors =
                DenseMatrix::new(self.dict.nwords() as usize, self.args.dim as usize);
            self.precompute_word_vectors(&word_vectors)?;
            self.word_vectors = Some(word_vectors);
        }
        Ok(())
    }

    /// Norm-normalized vector for every in-vocabulary word, for repeated
    /// nearest-neighbor queries.
    fn precompute_word_vectors(&self, word_vectors: &DenseMatrix) -> Result<()> {
        word_vectors.zero();
        let mut vec = Vector::new(self.args.dim as usize);
        for i in 0..self.dict.nwords() {
            let word = self.dict.get_word(i);
            self.get_word_vector(&mut vec, word);
            let norm = vec.norm();
            if norm > 0.0 {
                word_vectors.add_vector_to_row(vec.as_slice(), i as usize, 1.0 / norm);
            }
        }
        Ok(())
    }

    /// The k nearest in-vocabulary words to `word` by cosine similarity.
    pub fn get_nn(&mut self, word: &str, k: i32) -> Result<Vec<(f32, String)>> {
        let mut query = Vector::new(self.args.dim as usize);
        self.get_word_vector(&mut query, word);
        self.ensure_word_vectors()?;
        let Some(word_vectors) = self.word_vectors.as_ref() else {
            bail!("word vectors unavailable");
        };
        find_nn(&self.dict, word_vectors, &query, k, &[word])
    }

    /// Words closest to `a - b + c` (excluding the three query words).
    pub fn get_analogies(
        &mut self,
        k: i32,
        word_a: &str,
        word_b: &str,
        word_c: &str,
    ) -> Result<Vec<(f32, String)>> {
        let mut query = Vector::new(self.args.dim as usize);
        let mut buffer = Vector::new(self.args.dim as usize);
        self.get_word_vector(&mut buffer, word_a);
        query.add_vector_scaled(&buffer, 1.0 / (buffer.norm() + 1e-8));
        self.get_word_vector(&mut buffer, word_b);
        query.add_vector_scaled(&buffer, -1.0 / (buffer.norm() + 1e-8));
        self.get_word_vector(&mut buffer, word_c);
        query.add_vector_scaled(&buffer, 1.0 / (buffer.norm() + 1e-8));

        self.ensure_word_vectors()?;
        let Some(word_vectors) = self.word_vectors.as_ref() else {
            bail!("word vectors unavailable");
        };
        find_nn(
            &self.dict,
            word_vectors,
            &query,
            k,
            &[word_a, word_b, word_c],
        )
    }

    /// Top-k labels for a tokenized line. Supervised models only.
    pub fn predict(
        &self,
        k: i32,
        words: &[i32],
        predictions: &mut Predictions,
        threshold: f32,
    ) -> Result<()> {
        predictions.clear();
        if words.is_empty() {
            return Ok(());
        }
        ensure!(
            self.args.model == ModelName::Sup,
            "Model needs to be supervised for prediction!"
        );
        let mut state = State::new(self.args.dim as usize, self.dict.nlabels() as usize, 0);
        self.model().predict(words, k, threshold, predictions, &mut state)
    }

    /// Reads one line off the stream and predicts its labels with
    /// probabilities. Returns false at end of stream.
    pub fn predict_line<R: Read + Seek>(
        &self,
        reader: &mut TokenReader<R>,
        predictions: &mut Vec<(f32, String)>,
        k: i32,
        threshold: f32,
    ) -> Result<bool> {
        predictions.clear();
        if reader.is_eof() {
            return Ok(false);
        }
        let mut words = Vec::new();
        let mut labels = Vec::new();
        self.dict.get_line_labels(reader, &mut words, &mut labels)?;

        let mut line_predictions = Predictions::new();
        self.predict(k, &words, &mut line_predictions, threshold)?;
        for (score, id) in line_predictions {
            predictions.push((score.exp(), self.dict.get_label(id)?.to_string()));
        }
        Ok(true)
    }

    pub fn test<R: Read + Seek>(
        &self,
        reader: &mut TokenReader<R>,
        k: i32,
        threshold: f32,
        meter: &mut Meter,
    ) -> Result<()> {
        let mut line = Vec::new();
        let mut labels = Vec::new();
        let mut predictions = Predictions::new();
        while !reader.is_eof() {
            self.dict.get_line_labels(reader, &mut line, &mut labels)?;
            if !labels.is_empty() && !line.is_empty() {
                self.predict(k, &line, &mut predictions, threshold)?;
                meter.log(&labels, &predictions);
            }
        }
        Ok(())
    }

    /// Text vectors: `"<count> <dim>"` then one line per word.
    pub fn save_vectors(&self, path: &Path) -> Result<()> {
        let mut w = BufWriter::new(File::create(path).with_context(|| {
            format!("{} cannot be opened for saving vectors!", path.display())
        })?);
        writeln!(w, "{} {}", self.dict.nwords(), self.args.dim)?;
        let mut vec = Vector::new(self.args.dim as usize);
        for i in 0..self.dict.nwords() {
            let word = self.dict.get_word(i);
            self.get_word_vector(&mut vec, word);
            writeln!(w, "{word} {vec}")?;
        }
        Ok(())
    }

    /// Output-side vectors (labels for supervised models, words otherwise).
    pub fn save_output(&self, path: &Path) -> Result<()> {
        ensure!(
            !self.quant,
            "Option -saveOutput is not supported for quantized models."
        );
        let mut w = BufWriter::new(File::create(path).with_context(|| {
            format!("{} cannot be opened for saving vectors!", path.display())
        })?);

        let n = if self.args.model == ModelName::Sup {
            self.dict.nlabels()
        } else {
            self.dict.nwords()
        };
        writeln!(w, "{} {}", n, self.args.dim)?;
        let mut vec = Vector::new(self.args.dim as usize);
        for i in 0..n {
            let word = if self.args.model == ModelName::Sup {
                self.dict.get_label(i)?
            } else {
                self.dict.get_word(i)
            };
            vec.zero();
            vec.add_row(&self.output, i as usize);
            writeln!(w, "{word} {vec}")?;
        }
        Ok(())
    }

    pub fn save_model(&self, path: &Path) -> Result<()> {
        let mut w = BufWriter::new(
            File::create(path)
                .with_context(|| format!("{} cannot be opened for saving!", path.display()))?,
        );
        binio::write_i32(&mut w, FASTTEXT_FILEFORMAT_MAGIC)?;
        binio::write_i32(&mut w, FASTTEXT_VERSION)?;
        self.args.save(&mut w)?;
        self.dict.save(&mut w)?;

        binio::write_bool(&mut w, self.quant)?;
        self.input.save(&mut w)?;

        binio::write_bool(&mut w, self.args.qout)?;
        self.output.save(&mut w)?;
        Ok(())
    }

    pub fn load_model(path: &Path) -> Result<FastText> {
        let file = File::open(path)
            .with_context(|| format!("{} cannot be opened for loading!", path.display()))?;
        let mut r = BufReader::new(file);

        let magic = binio::read_i32(&mut r)
            .with_context(|| format!("{} cannot be read!", path.display()))?;
        ensure!(
            magic == FASTTEXT_FILEFORMAT_MAGIC,
            "{} has wrong file format!",
            path.display()
        );
        let version = binio::read_i32(&mut r)?;
        ensure!(
            version <= FASTTEXT_VERSION,
            "{} has wrong file format! (version {version} is newer than {FASTTEXT_VERSION})",
            path.display()
        );
        FastText::load_from(&mut r, version)
    }

    fn load_from<R: Read>(r: &mut R, version: i32) -> Result<FastText> {
        let mut args = Args::load(r)?;
        if version == 11 && args.model == ModelName::Sup {
            // backward compatibility: old supervised models do not use char ngrams
            args.maxn = 0;
        }
        let dict = Dictionary::load(&args, r)?;

        let quant_input = binio::read_bool(r)?;
        let input = Matrix::load(r, quant_input)?;
        ensure!(
            quant_input || !dict.is_pruned(),
            "Invalid model file.\n\
             Please download the updated model from www.fasttext.cc.\n\
             See issue #332 on Github for more information.\n"
        );

        args.qout = binio::read_bool(r)?;
        let output = Matrix::load(r, quant_input && args.qout)?;
        let loss = create_loss(&args, &dict);

        Ok(FastText {
            args,
            dict,
            input,
            output,
            loss,
            quant: quant_input,
            version,
            word_vectors: None,
            token_count: AtomicU64::new(0),
            shown_loss: Real::default(),
            start: Instant::now(),
        })
    }

    pub fn dump<W: Write>(&self, option: &str, w: &mut W) -> Result<()> {
        match option {
            "args" => self.args.dump(w),
            "dict" => self.dict.dump(w),
            "input" => self.input.dump(w),
            "output" => self.output.dump(w),
            _ => bail!("unknown dump option {option:?}; expected args, dict, input or output"),
        }
    }

    /// Rows to keep when cutting the input matrix down: sorted by descending
    /// norm, with the end-of-sentence row always first.
    fn select_embeddings(&self, input: &DenseMatrix, cutoff: usize) -> Result<Vec<i32>> {
        let mut norms = vec![0.0f32; input.rows()];
        input.l2_norm_rows(&mut norms)?;
        let eosid = self.dict.get_id(EOS);

        let mut idx: Vec<i32> = (0..input.rows() as i32).collect();
        idx.sort_by(|&i1, &i2| {
            if i1 == eosid {
                CmpOrdering::Less
            } else if i2 == eosid {
                CmpOrdering::Greater
            } else {
                OrderedFloat(norms[i2 as usize]).cmp(&OrderedFloat(norms[i1 as usize]))
            }
        });
        idx.truncate(cutoff);
        Ok(idx)
    }

    /// Compresses the model with product quantization, optionally pruning
    /// the vocabulary to `cutoff` rows (and retraining) first.
    pub fn quantize(&mut self, qargs: &Args) -> Result<()> {
        ensure!(
            self.args.model == ModelName::Sup,
            "For now we only support quantization of supervised models"
        );
        self.args.input = qargs.input.clone();
        self.args.output = qargs.output.clone();
        self.args.qout = qargs.qout;

        let mut input = match mem::replace(&mut self.input, Matrix::Dense(DenseMatrix::new(0, 0)))
        {
            Matrix::Dense(m) => m,
            quantized @ Matrix::Quant(_) => {
                self.input = quantized;
                bail!("Model is already quantized");
            }
        };

        if qargs.cutoff > 0 && (qargs.cutoff as usize) < input.rows() {
            let mut idx = self.select_embeddings(&input, qargs.cutoff as usize)?;
            self.dict.prune(&mut idx);

            let ninput = DenseMatrix::new(idx.len(), self.args.dim as usize);
            for (i, &old) in idx.iter().enumerate() {
                for j in 0..self.args.dim as usize {
                    ninput.set_at(i, j, input.at(old as usize, j));
                }
            }
            input = ninput;

            if qargs.retrain {
                self.args.epoch = qargs.epoch;
                self.args.lr = qargs.lr;
                self.args.thread = qargs.thread;
                self.args.verbose = qargs.verbose;
                self.input = Matrix::Dense(input);
                self.loss = create_loss(&self.args, &self.dict);
                self.start_threads()?;
                input = match mem::replace(&mut self.input, Matrix::Dense(DenseMatrix::new(0, 0)))
                {
                    Matrix::Dense(m) => m,
                    Matrix::Quant(_) => bail!("input matrix changed kind during retraining"),
                };
            }
        }

        self.input = Matrix::Quant(QuantMatrix::quantize(
            input,
            qargs.dsub as usize,
            qargs.qnorm,
        )?);

        if self.args.qout {
            let output =
                match mem::replace(&mut self.output, Matrix::Dense(DenseMatrix::new(0, 0))) {
                    Matrix::Dense(m) => m,
                    quantized @ Matrix::Quant(_) => {
                        self.output = quantized;
                        bail!("Model is already quantized");
                    }
                };
            self.output = Matrix::Quant(QuantMatrix::quantize(output, 2, qargs.qnorm)?);
        }

        self.quant = true;
        self.word_vectors = None;
        self.loss = create_loss(&self.args, &self.dict);
        Ok(())
    }
}

/// Seeds the input matrix from a text vectors file (our own `save_vectors`
/// format). Words found there are added to the dictionary; rows for words
/// that survive thresholding are copied in.
fn input_matrix_from_file(args: &Args, dict: &mut Dictionary, path: &Path) -> Result<DenseMatrix> {
    let file = File::open(path)
        .with_context(|| format!("{} cannot be opened for loading!", path.display()))?;
    let mut reader = BufReader::new(file);

    let mut header = String::new();
    std::io::BufRead::read_line(&mut reader, &mut header)
        .context("error reading pretrained vectors")?;
    let mut fields = header.split_whitespace();
    let n: usize = fields
        .next()
        .context("invalid pretrained vectors file")?
        .parse()
        .context("invalid pretrained vectors file")?;
    let dim: usize = fields
        .next()
        .context("invalid pretrained vectors file")?
        .parse()
        .context("invalid pretrained vectors file")?;
    ensure!(
        dim == args.dim as usize,
        "Dimension of pretrained vectors ({}) does not match dimension ({})!",
        dim,
        args.dim
    );

    let mat = DenseMatrix::new(n, dim);
    let mut words = Vec::with_capacity(n);
    let mut line = String::new();
    for i in 0..n {
        line.clear();
        std::io::BufRead::read_line(&mut reader, &mut line)
            .context("error reading pretrained vectors")?;
        let mut fields = line.split_whitespace();
        let word = fields
            .next()
            .context("invalid pretrained vectors file")?
            .to_string();
        for j in 0..dim {
            let value: f32 = fields
                .next()
                .context("invalid pretrained vectors file")?
                .parse()
                .context("invalid pretrained vectors file")?;
            mat.set_at(i, j, value);
        }
        dict.add(&word);
        words.push(word);
    }

    dict.threshold(1, 0);
    dict.init();
    let input = DenseMatrix::new((dict.nwords() + args.bucket) as usize, args.dim as usize);
    input.uniform(1.0 / args.dim as f32);

    for (i, word) in words.iter().enumerate() {
        let idx = dict.get_id(word);
        if idx < 0 || idx >= dict.nwords() {
            continue;
        }
        for j in 0..dim {
            input.set_at(idx as usize, j, mat.at(i, j));
        }
    }
    Ok(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn find_nn_ranks_by_cosine() {
        let mut args = Args::default();
        args.min_count = 1;
        args.verbose = 0;
        let mut dict = Dictionary::new(&args);
        let mut reader = TokenReader::new(Cursor::new(b"hot cold warm".to_vec())).unwrap();
        dict.read_from_file(&mut reader).unwrap();

        let wv = DenseMatrix::new(3, 2);
        wv.set_at(0, 0, 1.0); // hot
        wv.set_at(1, 0, -1.0); // cold
        wv.set_at(2, 0, 0.9); // warm
        wv.set_at(2, 1, 0.1);

        let mut query = Vector::new(2);
        query.set(0, 1.0);

        let nn = find_nn(&dict, &wv, &query, 2, &["hot"]).unwrap();
        assert_eq!(nn.len(), 2);
        assert_eq!(nn[0].1, "warm");
        assert_eq!(nn[1].1, "cold");
        assert!(nn[0].0 > nn[1].0);
    }
}
