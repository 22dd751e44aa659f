use std::fs;
use std::io::Cursor;
use std::path::PathBuf;
use std::process;

use fasttext::dictionary::TokenReader;
use fasttext::{Args, FastText, LossName, Meter, ModelName, Predictions};

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("fasttext-test-{}-{}", process::id(), name))
}

fn write_corpus(name: &str, lines: &[&str], repeat: usize) -> PathBuf {
    let path = temp_path(name);
    let mut text = String::new();
    for _ in 0..repeat {
        for line in lines {
            text.push_str(line);
            text.push('\n');
        }
    }
    fs::write(&path, text).unwrap();
    path
}

fn supervised_args(corpus: &str) -> Args {
    let mut args = Args::supervised();
    args.input = write_corpus(
        corpus,
        &[
            "__label__pos excellent amazing wonderful",
            "__label__pos great excellent superb",
            "__label__neg terrible awful horrible",
            "__label__neg bad terrible dreadful",
        ],
        25,
    );
    args.dim = 10;
    args.epoch = 20;
    args.lr = 0.5;
    args.thread = 2;
    args.verbose = 0;
    args
}

fn predict_labels(ft: &FastText, text: &str, k: i32, threshold: f32) -> Vec<(f32, String)> {
    let mut reader = TokenReader::new(Cursor::new(format!("{text}\n").into_bytes())).unwrap();
    let mut predictions = Vec::new();
    ft.predict_line(&mut reader, &mut predictions, k, threshold)
        .unwrap();
    predictions
}

#[test]
fn supervised_training_learns_separable_labels() {
    let args = supervised_args("sup-learn");
    let input = args.input.clone();
    let ft = FastText::train(args).unwrap();

    assert_eq!(ft.dictionary().nlabels(), 2);
    assert!(ft.dictionary().nwords() > 0);

    let pos = predict_labels(&ft, "excellent wonderful", 1, 0.0);
    assert_eq!(pos.len(), 1);
    assert_eq!(pos[0].1, "__label__pos");
    assert!(pos[0].0 > 0.5);

    let neg = predict_labels(&ft, "terrible awful", 1, 0.0);
    assert_eq!(neg[0].1, "__label__neg");

    // k bounds the result count; a sky-high threshold filters everything.
    let both = predict_labels(&ft, "excellent terrible", 5, 0.0);
    assert_eq!(both.len(), 2);
    let none = predict_labels(&ft, "excellent terrible", 5, 2.0);
    assert!(none.is_empty());

    // test over the training data should be essentially perfect
    let mut reader = TokenReader::new(Cursor::new(fs::read(&input).unwrap())).unwrap();
    let mut meter = Meter::new();
    ft.test(&mut reader, 1, 0.0, &mut meter).unwrap();
    assert_eq!(meter.nexamples(), 100);
    assert!(meter.precision() > 0.9, "precision {}", meter.precision());

    fs::remove_file(input).unwrap();
}

#[test]
fn model_file_round_trips_bit_exactly() {
    let args = supervised_args("sup-roundtrip");
    let input = args.input.clone();
    let ft = FastText::train(args).unwrap();

    let model_path = temp_path("sup-roundtrip.bin");
    ft.save_model(&model_path).unwrap();
    let loaded = FastText::load_model(&model_path).unwrap();

    // dictionary contents
    let dict = ft.dictionary();
    let loaded_dict = loaded.dictionary();
    assert_eq!(loaded_dict.size(), dict.size());
    assert_eq!(loaded_dict.nwords(), dict.nwords());
    assert_eq!(loaded_dict.nlabels(), dict.nlabels());
    assert_eq!(loaded_dict.ntokens(), dict.ntokens());
    assert_eq!(loaded_dict.is_pruned(), dict.is_pruned());
    let mut dumped = Vec::new();
    let mut loaded_dumped = Vec::new();
    dict.dump(&mut dumped).unwrap();
    loaded_dict.dump(&mut loaded_dumped).unwrap();
    assert_eq!(dumped, loaded_dumped);

    // dense matrices, bit for bit
    for (a, b) in [
        (ft.input_matrix().unwrap(), loaded.input_matrix().unwrap()),
        (ft.output_matrix().unwrap(), loaded.output_matrix().unwrap()),
    ] {
        assert_eq!(a.rows(), b.rows());
        assert_eq!(a.cols(), b.cols());
        for i in 0..a.rows() {
            for j in 0..a.cols() {
                assert_eq!(a.at(i, j).to_bits(), b.at(i, j).to_bits());
            }
        }
    }

    // and identical predictions
    let before = predict_labels(&ft, "excellent wonderful", 2, 0.0);
    let after = predict_labels(&loaded, "excellent wonderful", 2, 0.0);
    assert_eq!(before, after);

    // a second save must produce the identical matrix payload
    let model_path2 = temp_path("sup-roundtrip2.bin");
    loaded.save_model(&model_path2).unwrap();
    assert_eq!(fs::read(&model_path).unwrap(), fs::read(&model_path2).unwrap());

    fs::remove_file(input).unwrap();
    fs::remove_file(model_path).unwrap();
    fs::remove_file(model_path2).unwrap();
}

#[test]
fn corrupt_model_files_are_rejected() {
    let path = temp_path("bad-magic.bin");
    fs::write(&path, [0u8; 64]).unwrap();
    let err = FastText::load_model(&path).unwrap_err();
    assert!(err.to_string().contains("wrong file format"));
    fs::remove_file(path).unwrap();
}

#[test]
fn vectors_file_has_header_and_rows() {
    let args = supervised_args("sup-vectors");
    let input = args.input.clone();
    let ft = FastText::train(args).unwrap();

    let vec_path = temp_path("sup-vectors.vec");
    ft.save_vectors(&vec_path).unwrap();
    let text = fs::read_to_string(&vec_path).unwrap();
    let mut lines = text.lines();
    let header = lines.next().unwrap();
    assert_eq!(
        header,
        format!("{} {}", ft.dictionary().nwords(), ft.get_dimension())
    );
    let rows: Vec<&str> = lines.collect();
    assert_eq!(rows.len(), ft.dictionary().nwords() as usize);
    // every row is the token followed by dim floats
    for row in rows {
        let fields: Vec<&str> = row.split_whitespace().collect();
        assert_eq!(fields.len(), 1 + ft.get_dimension() as usize);
        for value in &fields[1..] {
            value.parse::<f32>().unwrap();
        }
    }

    fs::remove_file(input).unwrap();
    fs::remove_file(vec_path).unwrap();
}

#[test]
fn skipgram_trains_and_answers_neighbor_queries() {
    let corpus = write_corpus(
        "sg-corpus",
        &[
            "the quick brown fox jumps over the lazy dog",
            "a quick brown cat naps near the lazy dog",
        ],
        40,
    );
    let mut args = Args::skipgram();
    args.input = corpus.clone();
    args.dim = 10;
    args.epoch = 3;
    args.min_count = 1;
    args.thread = 2;
    args.verbose = 0;
    args.bucket = 5_000;
    let mut ft = FastText::train(args).unwrap();

    let nn = ft.get_nn("quick", 3).unwrap();
    assert_eq!(nn.len(), 3);
    assert!(nn.iter().all(|(_, w)| w != "quick"));

    let analogies = ft.get_analogies(2, "fox", "dog", "cat").unwrap();
    assert_eq!(analogies.len(), 2);
    for (_, w) in &analogies {
        assert!(w != "fox" && w != "dog" && w != "cat");
    }

    // predictions require a supervised model
    let mut predictions = Predictions::new();
    assert!(ft.predict(1, &[0], &mut predictions, 0.0).is_err());
    assert_eq!(ft.args().model, ModelName::Sg);

    fs::remove_file(corpus).unwrap();
}

#[test]
fn hierarchical_softmax_supervised_end_to_end() {
    let mut args = supervised_args("sup-hs");
    args.loss = LossName::Hs;
    let input = args.input.clone();
    let ft = FastText::train(args).unwrap();

    let pos = predict_labels(&ft, "excellent superb", 1, 0.0);
    assert_eq!(pos.len(), 1);
    assert_eq!(pos[0].1, "__label__pos");

    fs::remove_file(input).unwrap();
}

#[test]
fn quantized_model_round_trips_and_predicts() {
    let mut args = supervised_args("sup-quant");
    // force a bucket table so the input matrix is large enough to quantize
    args.word_ngrams = 2;
    args.bucket = 300;
    let input = args.input.clone();
    let mut ft = FastText::train(args).unwrap();
    let before = predict_labels(&ft, "excellent wonderful", 1, 0.0);

    let mut qargs = Args::default();
    qargs.input = input.clone();
    qargs.output = temp_path("sup-quant-out");
    qargs.dsub = 2;
    qargs.qnorm = true;
    ft.quantize(&qargs).unwrap();
    assert!(ft.is_quant());
    assert!(ft.input_matrix().is_err());

    let after = predict_labels(&ft, "excellent wonderful", 1, 0.0);
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].1, before[0].1);

    let ftz_path = temp_path("sup-quant.ftz");
    ft.save_model(&ftz_path).unwrap();
    let loaded = FastText::load_model(&ftz_path).unwrap();
    assert!(loaded.is_quant());
    assert_eq!(
        predict_labels(&loaded, "excellent wonderful", 1, 0.0),
        after
    );

    // quantizing twice is an error
    assert!(loaded.args().model == ModelName::Sup);
    let mut loaded = loaded;
    assert!(loaded.quantize(&qargs).is_err());

    fs::remove_file(input).unwrap();
    fs::remove_file(ftz_path).unwrap();
}

#[test]
fn pruned_quantized_model_keeps_labels() {
    let mut args = supervised_args("sup-prune");
    args.word_ngrams = 2;
    args.bucket = 300;
    let input = args.input.clone();
    let mut ft = FastText::train(args).unwrap();
    let full_rows = ft.input_matrix().unwrap().rows();

    let mut qargs = Args::default();
    qargs.input = input.clone();
    qargs.output = temp_path("sup-prune-out");
    qargs.dsub = 2;
    qargs.cutoff = 280;
    ft.quantize(&qargs).unwrap();

    assert!(ft.dictionary().is_pruned());
    assert!((280) < full_rows);
    assert_eq!(ft.dictionary().nlabels(), 2);

    // the pruned model still predicts a known label
    let predictions = predict_labels(&ft, "excellent wonderful amazing", 1, 0.0);
    assert_eq!(predictions.len(), 1);
    assert!(predictions[0].1.starts_with("__label__"));

    fs::remove_file(input).unwrap();
}
