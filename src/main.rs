use std::io::{self, BufRead, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use fasttext::dictionary::TokenReader;
use fasttext::{Args, FastText, LossName, Meter, Vector};

#[derive(Parser)]
#[command(
    name = "fasttext",
    about = "word representation learning and text classification",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args)]
struct TrainOptions {
    /// training file path
    #[arg(long, value_name = "FILE")]
    input: PathBuf,

    /// output file path; the model is saved to FILE.bin, vectors to FILE.vec
    #[arg(long, value_name = "FILE")]
    output: PathBuf,

    /// learning rate
    #[arg(long)]
    lr: Option<f64>,

    /// change the rate of updates for the learning rate
    #[arg(long = "lrUpdateRate", value_name = "N")]
    lr_update_rate: Option<i32>,

    /// size of word vectors
    #[arg(long)]
    dim: Option<i32>,

    /// size of the context window
    #[arg(long)]
    ws: Option<i32>,

    /// number of epochs
    #[arg(long)]
    epoch: Option<i32>,

    /// minimal number of word occurences
    #[arg(long = "minCount", value_name = "N")]
    min_count: Option<i64>,

    /// minimal number of label occurences
    #[arg(long = "minCountLabel", value_name = "N")]
    min_count_label: Option<i64>,

    /// number of negatives sampled
    #[arg(long)]
    neg: Option<i32>,

    /// max length of word ngram
    #[arg(long = "wordNgrams", value_name = "N")]
    word_ngrams: Option<i32>,

    /// loss function {ns, hs, softmax, one-vs-all}
    #[arg(long)]
    loss: Option<String>,

    /// number of buckets
    #[arg(long)]
    bucket: Option<i32>,

    /// min length of char ngram
    #[arg(long)]
    minn: Option<i32>,

    /// max length of char ngram
    #[arg(long)]
    maxn: Option<i32>,

    /// number of threads
    #[arg(long)]
    thread: Option<i32>,

    /// sampling threshold
    #[arg(long)]
    t: Option<f64>,

    /// labels prefix
    #[arg(long)]
    label: Option<String>,

    /// verbosity level
    #[arg(long)]
    verbose: Option<i32>,

    /// pretrained word vectors for supervised learning
    #[arg(long = "pretrainedVectors", value_name = "FILE")]
    pretrained_vectors: Option<PathBuf>,

    /// whether output params should be saved
    #[arg(long = "saveOutput")]
    save_output: bool,
}

#[derive(clap::Args)]
struct QuantizeOptions {
    /// training file path (for retraining with a cutoff)
    #[arg(long, value_name = "FILE")]
    input: Option<PathBuf>,

    /// model prefix; FILE.bin is loaded and FILE.ftz is written
    #[arg(long, value_name = "FILE")]
    output: PathBuf,

    /// number of words and ngrams to retain
    #[arg(long)]
    cutoff: Option<i64>,

    /// whether embeddings are finetuned if a cutoff is applied
    #[arg(long)]
    retrain: bool,

    /// whether the norm is quantized separately
    #[arg(long)]
    qnorm: bool,

    /// whether the classifier is quantized
    #[arg(long)]
    qout: bool,

    /// size of each sub-vector
    #[arg(long)]
    dsub: Option<i32>,

    /// learning rate for retraining
    #[arg(long)]
    lr: Option<f64>,

    /// number of epochs for retraining
    #[arg(long)]
    epoch: Option<i32>,

    /// number of threads for retraining
    #[arg(long)]
    thread: Option<i32>,

    /// verbosity level
    #[arg(long)]
    verbose: Option<i32>,
}

#[derive(Subcommand)]
enum Command {
    /// Train a supervised classifier
    Supervised(TrainOptions),
    /// Train a skipgram model
    Skipgram(TrainOptions),
    /// Train a cbow model
    Cbow(TrainOptions),
    /// Quantize a model to reduce the memory usage
    Quantize(QuantizeOptions),
    /// Evaluate a supervised classifier
    Test {
        model: PathBuf,
        /// test data filename (if -, read from stdin)
        test_data: PathBuf,
        /// predict top k labels
        #[arg(default_value_t = 1)]
        k: i32,
        /// probability threshold
        #[arg(default_value_t = 0.0)]
        threshold: f32,
    },
    /// Print labels with precision and recall scores
    TestLabel {
        model: PathBuf,
        test_data: PathBuf,
        #[arg(default_value_t = 1)]
        k: i32,
        #[arg(default_value_t = 0.0)]
        threshold: f32,
    },
    /// Predict most likely labels
    Predict {
        model: PathBuf,
        /// test data filename (if -, read from stdin)
        test_data: PathBuf,
        #[arg(default_value_t = 1)]
        k: i32,
        #[arg(default_value_t = 0.0)]
        threshold: f32,
    },
    /// Predict most likely labels with probabilities
    PredictProb {
        model: PathBuf,
        test_data: PathBuf,
        #[arg(default_value_t = 1)]
        k: i32,
        #[arg(default_value_t = 0.0)]
        threshold: f32,
    },
    /// Print word vectors given a trained model
    PrintWordVectors { model: PathBuf },
    /// Print sentence vectors given a trained model
    PrintSentenceVectors { model: PathBuf },
    /// Print ngrams given a trained model and word
    PrintNgrams { model: PathBuf, word: String },
    /// Query for nearest neighbors
    Nn {
        model: PathBuf,
        #[arg(default_value_t = 10)]
        k: i32,
    },
    /// Query for analogies
    Analogies {
        model: PathBuf,
        #[arg(default_value_t = 10)]
        k: i32,
    },
    /// Dump arguments, dictionary or input/output vectors
    Dump {
        model: PathBuf,
        /// one of args, dict, input, output
        option: String,
    },
}

fn parse_loss(name: &str) -> Result<LossName> {
    Ok(match name {
        "hs" => LossName::Hs,
        "ns" => LossName::Ns,
        "softmax" => LossName::Softmax,
        "one-vs-all" | "ova" => LossName::Ova,
        _ => bail!("Unknown loss: {name}"),
    })
}

impl TrainOptions {
    fn into_args(self, mut args: Args) -> Result<Args> {
        args.input = self.input;
        args.output = self.output;
        if let Some(lr) = self.lr {
            args.lr = lr;
        }
        if let Some(rate) = self.lr_update_rate {
            args.lr_update_rate = rate;
        }
        if let Some(dim) = self.dim {
            args.dim = dim;
        }
        if let Some(ws) = self.ws {
            args.ws = ws;
        }
        if let Some(epoch) = self.epoch {
            args.epoch = epoch;
        }
        if let Some(min_count) = self.min_count {
            args.min_count = min_count;
        }
        if let Some(min_count_label) = self.min_count_label {
            args.min_count_label = min_count_label;
        }
        if let Some(neg) = self.neg {
            args.neg = neg;
        }
        if let Some(word_ngrams) = self.word_ngrams {
            args.word_ngrams = word_ngrams;
        }
        if let Some(loss) = &self.loss {
            args.loss = parse_loss(loss)?;
        }
        if let Some(bucket) = self.bucket {
            args.bucket = bucket;
        }
        if let Some(minn) = self.minn {
            args.minn = minn;
        }
        if let Some(maxn) = self.maxn {
            args.maxn = maxn;
        }
        if let Some(thread) = self.thread {
            args.thread = thread;
        }
        if let Some(t) = self.t {
            args.t = t;
        }
        if let Some(label) = self.label {
            args.label = label;
        }
        if let Some(verbose) = self.verbose {
            args.verbose = verbose;
        }
        args.pretrained_vectors = self.pretrained_vectors;
        args.save_output = self.save_output;
        args.resolve();
        Ok(args)
    }
}

/// Opens the test data as a seekable token stream; "-" slurps stdin.
fn open_token_stream(path: &Path) -> Result<TokenReader<Cursor<Vec<u8>>>> {
    let bytes = if path == Path::new("-") {
        let mut buf = Vec::new();
        io::stdin()
            .read_to_end(&mut buf)
            .context("error reading stdin")?;
        buf
    } else {
        std::fs::read(path)
            .with_context(|| format!("{} cannot be opened!", path.display()))?
    };
    TokenReader::new(Cursor::new(bytes))
}

/// `prefix` + ".bin" etc. without clobbering dots in the prefix itself.
fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    PathBuf::from(format!("{}{suffix}", prefix.display()))
}

fn train(args: Args) -> Result<()> {
    let output = args.output.clone();
    let save_output = args.save_output;
    let ft = FastText::train(args)?;
    ft.save_model(&with_suffix(&output, ".bin"))?;
    ft.save_vectors(&with_suffix(&output, ".vec"))?;
    if save_output {
        ft.save_output(&with_suffix(&output, ".output"))?;
    }
    Ok(())
}

fn quantize(options: QuantizeOptions) -> Result<()> {
    let mut qargs = Args::default();
    if let Some(input) = options.input {
        qargs.input = input;
    }
    qargs.output = options.output.clone();
    if let Some(cutoff) = options.cutoff {
        qargs.cutoff = cutoff;
    }
    qargs.retrain = options.retrain;
    qargs.qnorm = options.qnorm;
    qargs.qout = options.qout;
    if let Some(dsub) = options.dsub {
        qargs.dsub = dsub;
    }
    if let Some(lr) = options.lr {
        qargs.lr = lr;
    }
    if let Some(epoch) = options.epoch {
        qargs.epoch = epoch;
    }
    if let Some(thread) = options.thread {
        qargs.thread = thread;
    }
    if let Some(verbose) = options.verbose {
        qargs.verbose = verbose;
    }

    let mut ft = FastText::load_model(&with_suffix(&options.output, ".bin"))?;
    ft.quantize(&qargs)?;
    ft.save_model(&with_suffix(&options.output, ".ftz"))?;
    Ok(())
}

fn test(model: &Path, test_data: &Path, k: i32, threshold: f32, per_label: bool) -> Result<()> {
    let ft = FastText::load_model(model)?;
    let mut reader = open_token_stream(test_data)?;
    let mut meter = Meter::new();
    ft.test(&mut reader, k, threshold, &mut meter)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if per_label {
        meter.write_label_metrics(&mut out, ft.dictionary())?;
    }
    meter.write_general_metrics(&mut out, k)?;
    Ok(())
}

fn predict(model: &Path, test_data: &Path, k: i32, threshold: f32, print_prob: bool) -> Result<()> {
    let ft = FastText::load_model(model)?;
    let mut reader = open_token_stream(test_data)?;

    let mut predictions = Vec::new();
    while ft.predict_line(&mut reader, &mut predictions, k, threshold)? {
        let line = predictions
            .iter()
            .map(|(prob, label)| {
                if print_prob {
                    format!("{label} {prob}")
                } else {
                    label.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(" ");
        println!("{line}");
    }
    Ok(())
}

fn print_word_vectors(model: &Path) -> Result<()> {
    let ft = FastText::load_model(model)?;
    let mut vec = Vector::new(ft.get_dimension() as usize);
    for line in io::stdin().lock().lines() {
        let word = line.context("error reading stdin")?;
        ft.get_word_vector(&mut vec, word.trim());
        println!("{} {}", word.trim(), vec);
    }
    Ok(())
}

fn print_sentence_vectors(model: &Path) -> Result<()> {
    let ft = FastText::load_model(model)?;
    let mut svec = Vector::new(ft.get_dimension() as usize);
    for line in io::stdin().lock().lines() {
        let mut line = line.context("error reading stdin")?;
        line.push('\n');
        let mut reader = TokenReader::new(Cursor::new(line.into_bytes()))?;
        ft.get_sentence_vector(&mut reader, &mut svec)?;
        println!("{svec}");
    }
    Ok(())
}

fn print_ngrams(model: &Path, word: &str) -> Result<()> {
    let ft = FastText::load_model(model)?;
    for (ngram, vec) in ft.get_ngram_vectors(word) {
        println!("{ngram} {vec}");
    }
    Ok(())
}

fn print_scored_words(results: &[(f32, String)]) {
    for (score, word) in results {
        println!("{word} {score}");
    }
}

fn nn(model: &Path, k: i32) -> Result<()> {
    let mut ft = FastText::load_model(model)?;

    let prompt = "Query word? ";
    print!("{prompt}");
    let _ = io::stdout().flush();
    for line in io::stdin().lock().lines() {
        let word = line.context("error reading stdin")?;
        print_scored_words(&ft.get_nn(word.trim(), k)?);
        print!("{prompt}");
        let _ = io::stdout().flush();
    }
    Ok(())
}

fn analogies(model: &Path, k: i32) -> Result<()> {
    if k <= 0 {
        bail!("k needs to be 1 or higher!");
    }
    let mut ft = FastText::load_model(model)?;

    let prompt = "Query triplet (A - B + C)? ";
    print!("{prompt}");
    let _ = io::stdout().flush();
    for line in io::stdin().lock().lines() {
        let line = line.context("error reading stdin")?;
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.len() != 3 {
            eprintln!("three words are needed to perform the calculation");
        } else {
            print_scored_words(&ft.get_analogies(k, words[0], words[1], words[2])?);
        }
        print!("{prompt}");
        let _ = io::stdout().flush();
    }
    Ok(())
}

fn dump(model: &Path, option: &str) -> Result<()> {
    let ft = FastText::load_model(model)?;
    let stdout = io::stdout();
    ft.dump(option, &mut stdout.lock())
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Supervised(options) => train(options.into_args(Args::supervised())?),
        Command::Skipgram(options) => train(options.into_args(Args::skipgram())?),
        Command::Cbow(options) => train(options.into_args(Args::cbow())?),
        Command::Quantize(options) => quantize(options),
        Command::Test {
            model,
            test_data,
            k,
            threshold,
        } => test(&model, &test_data, k, threshold, false),
        Command::TestLabel {
            model,
            test_data,
            k,
            threshold,
        } => test(&model, &test_data, k, threshold, true),
        Command::Predict {
            model,
            test_data,
            k,
            threshold,
        } => predict(&model, &test_data, k, threshold, false),
        Command::PredictProb {
            model,
            test_data,
            k,
            threshold,
        } => predict(&model, &test_data, k, threshold, true),
        Command::PrintWordVectors { model } => print_word_vectors(&model),
        Command::PrintSentenceVectors { model } => print_sentence_vectors(&model),
        Command::PrintNgrams { model, word } => print_ngrams(&model, &word),
        Command::Nn { model, k } => nn(&model, k),
        Command::Analogies { model, k } => analogies(&model, k),
        Command::Dump { model, option } => dump(&model, &option),
    }
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("{err:#}");
        process::exit(1);
    }
}
