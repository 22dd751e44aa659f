use std::collections::BTreeMap;
use std::io::{BufReader, Read, Seek, SeekFrom, Write};

use anyhow::{bail, ensure, Context, Result};

use crate::args::{Args, ModelName};
use crate::binio;
use crate::rng::Rng;

pub const EOS: &str = "</s>";
pub const BOW: &str = "<";
pub const EOW: &str = ">";

const MAX_VOCAB_SIZE: usize = 30_000_000;
const MAX_LINE_SIZE: usize = 1024;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum EntryType {
    Word = 0,
    Label = 1,
}

#[derive(Clone, Debug)]
pub struct Entry {
    pub word: String,
    pub count: i64,
    pub entry_type: EntryType,
    pub subwords: Vec<i32>,
}

/// FNV-1a over the token's UTF-8 bytes. Pure and stable: dictionary files
/// depend on it reproducing across runs and versions.
pub fn hash(s: &str) -> u32 {
    let mut h: u32 = 2166136261;
    for &b in s.as_bytes() {
        h ^= b as u32;
        h = h.wrapping_mul(16777619);
    }
    h
}

/// Reads whitespace-delimited tokens off a byte stream.
///
/// A newline terminating a word is pushed back so the next call yields the
/// end-of-sentence pseudo-token; a newline on its own yields it directly.
pub struct TokenReader<R: Read + Seek> {
    reader: BufReader<R>,
    len: u64,
    pos: u64,
    pending_newline: bool,
}

impl<R: Read + Seek> TokenReader<R> {
    pub fn new(mut inner: R) -> Result<TokenReader<R>> {
        let len = inner
            .seek(SeekFrom::End(0))
            .context("error checking input stream size")?;
        inner.seek(SeekFrom::Start(0))?;
        Ok(TokenReader {
            reader: BufReader::new(inner),
            len,
            pos: 0,
            pending_newline: false,
        })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_eof(&self) -> bool {
        !self.pending_newline && self.pos >= self.len
    }

    pub fn seek(&mut self, offset: u64) -> Result<()> {
        self.reader
            .seek(SeekFrom::Start(offset))
            .context("error seeking within input stream")?;
        self.pos = offset;
        self.pending_newline = false;
        Ok(())
    }

    /// Rewind a fully consumed stream so a worker whose byte range ends at
    /// EOF keeps producing lines until the token target is reached.
    pub fn reset_if_eof(&mut self) -> Result<()> {
        if self.is_eof() {
            self.seek(0)?;
        }
        Ok(())
    }

    pub fn read_word(&mut self) -> Result<Option<String>> {
        if self.pending_newline {
            self.pending_newline = false;
            self.pos += 1;
            return Ok(Some(EOS.to_string()));
        }
        let mut word: Vec<u8> = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            let n = self
                .reader
                .read(&mut byte)
                .context("error reading a word")?;
            if n == 0 {
                break;
            }
            self.pos += 1;
            let c = byte[0];
            if matches!(c, b' ' | b'\n' | b'\r' | b'\t' | b'\x0b' | b'\x0c' | b'\0') {
                if word.is_empty() {
                    if c == b'\n' {
                        return Ok(Some(EOS.to_string()));
                    }
                    continue;
                }
                if c == b'\n' {
                    self.pending_newline = true;
                    self.pos -= 1;
                }
                break;
            }
            word.push(c);
        }
        Ok(if word.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&word).into_owned())
        })
    }
}

/// The vocabulary: words and labels plus the subword-ngram universe.
///
/// Lookups go through a fixed-capacity open-addressing table with linear
/// probing (-1 = empty slot), rebuilt whenever entries are thresholded or
/// pruned.
pub struct Dictionary {
    args: Args,
    word2int: Vec<i32>,
    words: Vec<Entry>,
    pdiscard: Vec<f32>,
    size: i32,
    nwords: i32,
    nlabels: i32,
    ntokens: i64,
    pruneidx_size: i64,
    pruneidx: BTreeMap<i32, i32>,
}

fn find_slot(word2int: &[i32], words: &[Entry], w: &str, h: u32) -> usize {
    let capacity = word2int.len();
    let mut id = h as usize % capacity;
    while word2int[id] != -1 && words[word2int[id] as usize].word != w {
        id = (id + 1) % capacity;
    }
    id
}

impl Dictionary {
    pub fn new(args: &Args) -> Dictionary {
        Dictionary {
            args: args.clone(),
            word2int: vec![-1; MAX_VOCAB_SIZE],
            words: Vec::new(),
            pdiscard: Vec::new(),
            size: 0,
            nwords: 0,
            nlabels: 0,
            ntokens: 0,
            pruneidx_size: -1,
            pruneidx: BTreeMap::new(),
        }
    }

    pub fn size(&self) -> i32 {
        self.size
    }

    pub fn nwords(&self) -> i32 {
        self.nwords
    }

    pub fn nlabels(&self) -> i32 {
        self.nlabels
    }

    pub fn ntokens(&self) -> i64 {
        self.ntokens
    }

    fn find(&self, w: &str) -> usize {
        find_slot(&self.word2int, &self.words, w, hash(w))
    }

    pub fn add(&mut self, w: &str) {
        let h = self.find(w);
        self.ntokens += 1;
        match self.word2int[h] {
            -1 => {
                self.words.push(Entry {
                    word: w.to_string(),
                    count: 1,
                    entry_type: self.entry_type_of(w),
                    subwords: Vec::new(),
                });
                self.word2int[h] = self.size;
                self.size += 1;
            }
            id => self.words[id as usize].count += 1,
        }
    }

    /// Subword ids of an in-vocabulary word. The first id is always the
    /// word's own id.
    pub fn get_subwords(&self, i: i32) -> &[i32] {
        debug_assert!(i >= 0 && i < self.nwords);
        &self.words[i as usize].subwords
    }

    /// Subword ids of an arbitrary word, hashing on the fly when it is out
    /// of vocabulary.
    pub fn get_subwords_of(&self, word: &str) -> Vec<i32> {
        let i = self.get_id(word);
        if i >= 0 {
            return self.get_subwords(i).to_vec();
        }
        let mut ngrams = Vec::new();
        if word != EOS {
            self.compute_subwords(&format!("{BOW}{word}{EOW}"), &mut ngrams, None);
        }
        ngrams
    }

    /// Subword ids plus the corresponding substrings, for display.
    pub fn get_subwords_with_strings(&self, word: &str) -> (Vec<i32>, Vec<String>) {
        let mut ngrams = Vec::new();
        let mut substrings = Vec::new();
        let i = self.get_id(word);
        if i >= 0 {
            ngrams.push(i);
            substrings.push(self.words[i as usize].word.clone());
        }
        if word != EOS {
            self.compute_subwords(
                &format!("{BOW}{word}{EOW}"),
                &mut ngrams,
                Some(&mut substrings),
            );
        }
        (ngrams, substrings)
    }

    /// Whether to drop word `id` this time around. Frequent words have a
    /// low discard probability; labels and supervised models never discard.
    pub fn discard(&self, id: i32, rand: f32) -> bool {
        debug_assert!(id >= 0 && id < self.nwords);
        if self.args.model == ModelName::Sup {
            return false;
        }
        rand > self.pdiscard[id as usize]
    }

    pub fn get_id(&self, w: &str) -> i32 {
        self.word2int[self.find(w)]
    }

    pub fn get_id_with_hash(&self, w: &str, h: u32) -> i32 {
        self.word2int[find_slot(&self.word2int, &self.words, w, h)]
    }

    pub fn get_type(&self, id: i32) -> EntryType {
        debug_assert!(id >= 0 && id < self.size);
        self.words[id as usize].entry_type
    }

    fn entry_type_of(&self, w: &str) -> EntryType {
        if w.starts_with(&self.args.label) {
            EntryType::Label
        } else {
            EntryType::Word
        }
    }

    pub fn get_word(&self, id: i32) -> &str {
        debug_assert!(id >= 0 && id < self.size);
        &self.words[id as usize].word
    }

    pub fn get_label(&self, lid: i32) -> Result<&str> {
        ensure!(
            lid >= 0 && lid < self.nlabels,
            "Label id is out of range [0, {}]",
            self.nlabels
        );
        Ok(&self.words[(lid + self.nwords) as usize].word)
    }

    /// Extracts every byte-ngram of char-length `minn..=maxn` from a word
    /// already wrapped in boundary markers, skipping UTF-8 continuation
    /// bytes as ngram start/extension points. Length-1 ngrams touching the
    /// boundary markers are not emitted. Hash collisions into the bucket
    /// space are accepted.
    fn compute_subwords(
        &self,
        word: &str,
        ngrams: &mut Vec<i32>,
        mut substrings: Option<&mut Vec<String>>,
    ) {
        let bytes = word.as_bytes();
        for i in 0..bytes.len() {
            if bytes[i] & 0xC0 == 0x80 {
                continue;
            }
            let mut ngram: Vec<u8> = Vec::new();
            let mut j = i;
            let mut n = 1;
            while j < bytes.len() && n <= self.args.maxn {
                ngram.push(bytes[j]);
                j += 1;
                while j < bytes.len() && bytes[j] & 0xC0 == 0x80 {
                    ngram.push(bytes[j]);
                    j += 1;
                }
                if n >= self.args.minn && !(n == 1 && (i == 0 || j == bytes.len())) {
                    let s = String::from_utf8_lossy(&ngram).into_owned();
                    let h = (hash(&s) % self.args.bucket as u32) as i32;
                    self.push_hash(ngrams, h);
                    if let Some(subs) = substrings.as_deref_mut() {
                        subs.push(s);
                    }
                }
                n += 1;
            }
        }
    }

    fn init_ngrams(&mut self) {
        for i in 0..self.size as usize {
            let word = format!("{BOW}{}{EOW}", self.words[i].word);
            let mut subwords = vec![i as i32];
            if self.words[i].word != EOS {
                self.compute_subwords(&word, &mut subwords, None);
            }
            self.words[i].subwords = subwords;
        }
    }

    /// Scans a corpus, counting every token, with on-line pruning when the
    /// raw vocabulary outgrows the hash table.
    pub fn read_from_file<R: Read + Seek>(&mut self, reader: &mut TokenReader<R>) -> Result<()> {
        let mut min_threshold: i64 = 1;
        while let Some(word) = reader.read_word()? {
            self.add(&word);
            if self.ntokens % 1_000_000 == 0 && self.args.verbose > 1 {
                eprint!("\rRead {}M words", self.ntokens / 1_000_000);
            }
            if self.size as f64 > 0.75 * MAX_VOCAB_SIZE as f64 {
                min_threshold += 1;
                self.threshold(min_threshold, min_threshold);
            }
        }
        self.threshold(self.args.min_count, self.args.min_count_label);
        self.init_table_discard();
        self.init_ngrams();
        if self.args.verbose > 0 {
            eprintln!("\rRead {}M words", self.ntokens / 1_000_000);
            eprintln!("Number of words:  {}", self.nwords);
            eprintln!("Number of labels: {}", self.nlabels);
        }
        if self.size == 0 {
            bail!("Empty vocabulary. Try a smaller -minCount value.");
        }
        Ok(())
    }

    /// Sorts entries (words first, then labels, by descending count) and
    /// drops those below the per-type cutoff, then rebuilds the hash table.
    /// The sort is stable so equal counts keep their discovery order.
    pub fn threshold(&mut self, t: i64, tl: i64) {
        self.words.sort_by(|a, b| {
            (a.entry_type as u8)
                .cmp(&(b.entry_type as u8))
                .then(b.count.cmp(&a.count))
        });
        self.words.retain(|e| match e.entry_type {
            EntryType::Word => e.count >= t,
            EntryType::Label => e.count >= tl,
        });

        self.size = 0;
        self.nwords = 0;
        self.nlabels = 0;
        self.word2int.fill(-1);

        for i in 0..self.words.len() {
            let h = hash(&self.words[i].word);
            let slot = find_slot(&self.word2int, &self.words, &self.words[i].word, h);
            self.word2int[slot] = self.size;
            self.size += 1;
            match self.words[i].entry_type {
                EntryType::Word => self.nwords += 1,
                EntryType::Label => self.nlabels += 1,
            }
        }
    }

    fn init_table_discard(&mut self) {
        self.pdiscard.clear();
        self.pdiscard.reserve(self.size as usize);
        for e in &self.words {
            let f = e.count as f64 / self.ntokens as f64;
            // Can exceed 1 for very frequent words; the rand > p comparison
            // then simply always keeps them.
            self.pdiscard
                .push(((self.args.t / f).sqrt() + self.args.t / f) as f32);
        }
    }

    pub fn get_counts(&self, entry_type: EntryType) -> Vec<i64> {
        self.words
            .iter()
            .filter(|e| e.entry_type == entry_type)
            .map(|e| e.count)
            .collect()
    }

    /// Combines adjacent token hashes into word-ngram bucket ids.
    fn add_word_ngrams(&self, line: &mut Vec<i32>, hashes: &[u32], n: i32) {
        for i in 0..hashes.len() {
            let mut h = hashes[i] as u64;
            for j in i + 1..hashes.len().min(i + n as usize) {
                h = h.wrapping_mul(116049371).wrapping_add(hashes[j] as u64);
                self.push_hash(line, (h % self.args.bucket as u64) as i32);
            }
        }
    }

    fn add_subwords(&self, line: &mut Vec<i32>, token: &str, wid: i32) {
        if wid < 0 {
            // out of vocab
            if token != EOS {
                self.compute_subwords(&format!("{BOW}{token}{EOW}"), line, None);
            }
        } else if self.args.maxn <= 0 {
            // in vocab w/o subwords
            line.push(wid);
        } else {
            // in vocab w/ subwords
            line.extend_from_slice(self.get_subwords(wid));
        }
    }

    fn push_hash(&self, hashes: &mut Vec<i32>, mut id: i32) {
        if self.pruneidx_size == 0 || id < 0 {
            return;
        }
        if self.pruneidx_size > 0 {
            match self.pruneidx.get(&id) {
                Some(&mapped) => id = mapped,
                None => return,
            }
        }
        hashes.push(self.nwords + id);
    }

    /// Tokenizes one line into word ids for unsupervised training, applying
    /// frequency-based subsampling. Returns the number of known tokens
    /// consumed.
    pub fn get_line<R: Read + Seek>(
        &self,
        reader: &mut TokenReader<R>,
        words: &mut Vec<i32>,
        rng: &mut Rng,
    ) -> Result<i32> {
        let mut ntokens = 0;
        reader.reset_if_eof()?;
        words.clear();

        while let Some(token) = reader.read_word()? {
            let wid = self.get_id(&token);
            if wid < 0 {
                continue;
            }
            ntokens += 1;
            if self.get_type(wid) == EntryType::Word && !self.discard(wid, rng.f32()) {
                words.push(wid);
            }
            if ntokens > MAX_LINE_SIZE as i32 || token == EOS {
                break;
            }
        }
        Ok(ntokens)
    }

    /// Tokenizes one line into (sub)word+ngram ids and label ids for
    /// supervised training and inference. No subsampling is applied.
    pub fn get_line_labels<R: Read + Seek>(
        &self,
        reader: &mut TokenReader<R>,
        words: &mut Vec<i32>,
        labels: &mut Vec<i32>,
    ) -> Result<i32> {
        let mut word_hashes: Vec<u32> = Vec::new();
        let mut ntokens = 0;
        reader.reset_if_eof()?;
        words.clear();
        labels.clear();

        while let Some(token) = reader.read_word()? {
            let h = hash(&token);
            let wid = self.get_id_with_hash(&token, h);
            let entry_type = if wid < 0 {
                self.entry_type_of(&token)
            } else {
                self.get_type(wid)
            };

            ntokens += 1;
            match entry_type {
                EntryType::Word => {
                    self.add_subwords(words, &token, wid);
                    word_hashes.push(h);
                }
                EntryType::Label => {
                    if wid >= 0 {
                        labels.push(wid - self.nwords);
                    }
                }
            }
            if token == EOS {
                break;
            }
        }
        self.add_word_ngrams(words, &word_hashes, self.args.word_ngrams);
        Ok(ntokens)
    }

    /// Recomputes the discard table and subword lists after direct `add`s
    /// (the pretrained-vectors path).
    pub fn init(&mut self) {
        self.init_table_discard();
        self.init_ngrams();
    }

    pub fn is_pruned(&self) -> bool {
        self.pruneidx_size >= 0
    }

    /// Rewrites the vocabulary to keep only the given word ids (labels are
    /// always kept) and records which ngram buckets survive. On return,
    /// `idx` holds the retained old row ids in new-id order.
    pub fn prune(&mut self, idx: &mut Vec<i32>) {
        let mut words = Vec::new();
        let mut ngrams = Vec::new();
        for &val in idx.iter() {
            if val < self.nwords {
                words.push(val);
            } else {
                ngrams.push(val);
            }
        }
        words.sort();
        idx.clear();
        idx.extend_from_slice(&words);

        if !ngrams.is_empty() {
            for (i, &ngram) in ngrams.iter().enumerate() {
                self.pruneidx.insert(ngram - self.nwords, i as i32);
            }
            idx.extend_from_slice(&ngrams);
        }
        self.pruneidx_size = self.pruneidx.len() as i64;

        self.word2int.fill(-1);
        let mut j = 0usize;
        for i in 0..self.words.len() {
            if self.get_type(i as i32) == EntryType::Label
                || (j < words.len() && words[j] == i as i32)
            {
                self.words.swap(j, i);
                let h = hash(&self.words[j].word);
                let slot = find_slot(&self.word2int, &self.words, &self.words[j].word, h);
                self.word2int[slot] = j as i32;
                j += 1;
            }
        }
        self.nwords = words.len() as i32;
        self.size = self.nwords + self.nlabels;
        self.words.truncate(self.size as usize);
        self.init_ngrams();
    }

    pub fn save<W: Write>(&self, w: &mut W) -> Result<()> {
        binio::write_i32(w, self.size)?;
        binio::write_i32(w, self.nwords)?;
        binio::write_i32(w, self.nlabels)?;
        binio::write_i64(w, self.ntokens)?;
        binio::write_i64(w, self.pruneidx_size)?;
        for e in &self.words {
            binio::write_str(w, &e.word)?;
            binio::write_i64(w, e.count)?;
            binio::write_u8(w, e.entry_type as u8)?;
        }
        for (&k, &v) in &self.pruneidx {
            binio::write_i32(w, k)?;
            binio::write_i32(w, v)?;
        }
        Ok(())
    }

    pub fn load<R: Read>(args: &Args, r: &mut R) -> Result<Dictionary> {
        let size = binio::read_i32(r).context("error reading dictionary block")?;
        let nwords = binio::read_i32(r)?;
        let nlabels = binio::read_i32(r)?;
        let ntokens = binio::read_i64(r)?;
        let pruneidx_size = binio::read_i64(r)?;

        let mut words = Vec::with_capacity(size as usize);
        for _ in 0..size {
            let word = binio::read_str(r)?;
            let count = binio::read_i64(r)?;
            let entry_type = match binio::read_u8(r)? {
                0 => EntryType::Word,
                1 => EntryType::Label,
                t => bail!("unknown entry type {t} in dictionary"),
            };
            words.push(Entry {
                word,
                count,
                entry_type,
                subwords: Vec::new(),
            });
        }

        let mut pruneidx = BTreeMap::new();
        for _ in 0..pruneidx_size.max(0) {
            let key = binio::read_i32(r)?;
            let value = binio::read_i32(r)?;
            pruneidx.insert(key, value);
        }

        let capacity = ((size as f64 / 0.7).ceil() as usize).max(1);
        let mut dict = Dictionary {
            args: args.clone(),
            word2int: vec![-1; capacity],
            words,
            pdiscard: Vec::new(),
            size,
            nwords,
            nlabels,
            ntokens,
            pruneidx_size,
            pruneidx,
        };
        dict.init_table_discard();
        dict.init_ngrams();
        for i in 0..dict.size {
            let slot = dict.find(&dict.words[i as usize].word);
            dict.word2int[slot] = i;
        }
        Ok(dict)
    }

    pub fn dump<W: Write>(&self, w: &mut W) -> Result<()> {
        writeln!(w, "{}", self.words.len())?;
        for e in &self.words {
            let entry_type = match e.entry_type {
                EntryType::Word => "word",
                EntryType::Label => "label",
            };
            writeln!(w, "{} {} {}", e.word, e.count, entry_type)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn reader(text: &str) -> TokenReader<Cursor<Vec<u8>>> {
        TokenReader::new(Cursor::new(text.as_bytes().to_vec())).unwrap()
    }

    fn small_args() -> Args {
        let mut args = Args::default();
        args.min_count = 1;
        args.verbose = 0;
        args
    }

    #[test]
    fn hash_is_pure_and_stable() {
        assert_eq!(hash(""), 2166136261);
        assert_eq!(hash("a"), hash("a"));
        assert_ne!(hash("a"), hash("b"));
        assert_ne!(hash("ab"), hash("ba"));
    }

    #[test]
    fn token_reader_contract() {
        let mut r = reader("a b\tc\nd");
        assert_eq!(r.read_word().unwrap().as_deref(), Some("a"));
        assert_eq!(r.read_word().unwrap().as_deref(), Some("b"));
        assert_eq!(r.read_word().unwrap().as_deref(), Some("c"));
        // The newline terminating "c" is delivered as EOS on the next call.
        assert_eq!(r.read_word().unwrap().as_deref(), Some(EOS));
        assert_eq!(r.read_word().unwrap().as_deref(), Some("d"));
        assert_eq!(r.read_word().unwrap(), None);
        assert!(r.is_eof());

        let mut r = reader("\n\n");
        assert_eq!(r.read_word().unwrap().as_deref(), Some(EOS));
        assert_eq!(r.read_word().unwrap().as_deref(), Some(EOS));
        assert_eq!(r.read_word().unwrap(), None);
    }

    #[test]
    fn a_b_a_scenario() {
        let args = small_args();
        let mut dict = Dictionary::new(&args);
        dict.read_from_file(&mut reader("a b a")).unwrap();
        assert_eq!(dict.nwords(), 2);
        assert_eq!(dict.nlabels(), 0);
        assert_eq!(dict.ntokens(), 3);
        assert_eq!(dict.size(), 2);

        // Two identically seeded runs tokenize identically.
        let mut line1 = Vec::new();
        let mut line2 = Vec::new();
        dict.get_line(&mut reader("a b a"), &mut line1, &mut Rng::new(42))
            .unwrap();
        dict.get_line(&mut reader("a b a"), &mut line2, &mut Rng::new(42))
            .unwrap();
        assert_eq!(line1, line2);
    }

    #[test]
    fn threshold_invariants() {
        let mut args = small_args();
        args.min_count = 2;
        args.min_count_label = 1;
        let mut dict = Dictionary::new(&args);
        dict.read_from_file(&mut reader("__label__x a a a b b c a b"))
            .unwrap();

        assert_eq!(dict.size(), dict.nwords() + dict.nlabels());
        assert_eq!(dict.nwords(), 2); // a (4), b (3); c dropped
        assert_eq!(dict.nlabels(), 1);
        // words first, sorted by descending count; labels last
        assert_eq!(dict.get_word(0), "a");
        assert_eq!(dict.get_word(1), "b");
        assert_eq!(dict.get_word(2), "__label__x");
        assert_eq!(dict.get_type(2), EntryType::Label);
        assert_eq!(dict.get_id("c"), -1);
        assert_eq!(dict.get_label(0).unwrap(), "__label__x");
        assert!(dict.get_label(1).is_err());
    }

    #[test]
    fn empty_vocabulary_is_fatal() {
        let mut args = small_args();
        args.min_count = 100;
        let mut dict = Dictionary::new(&args);
        assert!(dict.read_from_file(&mut reader("a b c")).is_err());
    }

    #[test]
    fn discard_bounds() {
        let args = small_args();
        let mut dict = Dictionary::new(&args);
        dict.read_from_file(&mut reader("a a a a a a a a b")).unwrap();
        let a = dict.get_id("a");
        // pdiscard = sqrt(t/f) + t/f is tiny for such a frequent word, so a
        // draw of ~1 discards and a draw at/below pdiscard keeps.
        assert!(dict.discard(a, 0.999999));
        assert!(!dict.discard(a, 0.0));

        let mut sup = small_args();
        sup.model = ModelName::Sup;
        let mut dict = Dictionary::new(&sup);
        dict.read_from_file(&mut reader("a a a a a a a a b")).unwrap();
        assert!(!dict.discard(dict.get_id("a"), 0.999999));
    }

    #[test]
    fn subword_boundaries() {
        let mut args = small_args();
        args.minn = 1;
        args.maxn = 2;
        args.bucket = 1000;
        let dict = Dictionary::new(&args);
        let (_, substrings) = dict.get_subwords_with_strings("ab");
        // "<ab>": unigrams only for interior characters, bigrams everywhere.
        assert_eq!(substrings, vec!["<a", "a", "ab", "b", "b>"]);

        let mut args = small_args();
        args.minn = 3;
        args.maxn = 3;
        args.bucket = 1000;
        let dict = Dictionary::new(&args);
        let (_, substrings) = dict.get_subwords_with_strings("ab");
        assert_eq!(substrings, vec!["<ab", "ab>"]);
    }

    #[test]
    fn subwords_respect_multibyte_sequences() {
        let mut args = small_args();
        args.minn = 1;
        args.maxn = 1;
        args.bucket = 1000;
        let dict = Dictionary::new(&args);
        let (_, substrings) = dict.get_subwords_with_strings("né");
        // No ngram may start or end inside the two-byte é sequence.
        assert_eq!(substrings, vec!["n", "é"]);
    }

    #[test]
    fn first_subword_is_the_word_itself() {
        let mut args = small_args();
        args.minn = 3;
        args.maxn = 3;
        args.bucket = 1000;
        let mut dict = Dictionary::new(&args);
        dict.read_from_file(&mut reader("hello hello")).unwrap();
        let id = dict.get_id("hello");
        let subwords = dict.get_subwords(id);
        assert_eq!(subwords[0], id);
        assert!(subwords.len() > 1);
        assert!(subwords[1..].iter().all(|&s| s >= dict.nwords()));
    }

    #[test]
    fn supervised_line_collects_words_and_labels() {
        let mut args = small_args();
        args.model = ModelName::Sup;
        args.minn = 0;
        args.maxn = 0;
        let mut dict = Dictionary::new(&args);
        dict.read_from_file(&mut reader("__label__pos good fine\n__label__neg bad sad"))
            .unwrap();

        let mut words = Vec::new();
        let mut labels = Vec::new();
        let n = dict
            .get_line_labels(&mut reader("good bad __label__pos"), &mut words, &mut labels)
            .unwrap();
        assert_eq!(n, 3);
        assert_eq!(words.len(), 2);
        assert_eq!(labels, vec![dict.get_id("__label__pos") - dict.nwords()]);
    }

    #[test]
    fn word_ngrams_are_added() {
        let mut args = small_args();
        args.model = ModelName::Sup;
        args.minn = 0;
        args.maxn = 0;
        args.word_ngrams = 2;
        args.bucket = 100;
        let mut dict = Dictionary::new(&args);
        dict.read_from_file(&mut reader("a b c a b c")).unwrap();

        let mut words = Vec::new();
        let mut labels = Vec::new();
        dict.get_line_labels(&mut reader("a b c"), &mut words, &mut labels)
            .unwrap();
        // 3 unigram ids + 2 bigram bucket ids
        assert_eq!(words.len(), 5);
        assert!(words[3] >= dict.nwords() && words[3] < dict.nwords() + args.bucket);
    }

    #[test]
    fn save_load_round_trip() {
        let mut args = small_args();
        args.minn = 2;
        args.maxn = 3;
        args.bucket = 500;
        let mut dict = Dictionary::new(&args);
        dict.read_from_file(&mut reader("the cat sat on the mat __label__x"))
            .unwrap();

        let mut buf = Vec::new();
        dict.save(&mut buf).unwrap();
        let loaded = Dictionary::load(&args, &mut Cursor::new(buf)).unwrap();

        assert_eq!(loaded.size(), dict.size());
        assert_eq!(loaded.nwords(), dict.nwords());
        assert_eq!(loaded.nlabels(), dict.nlabels());
        assert_eq!(loaded.ntokens(), dict.ntokens());
        assert_eq!(loaded.is_pruned(), dict.is_pruned());
        for i in 0..dict.size() {
            assert_eq!(loaded.get_word(i), dict.get_word(i));
            assert_eq!(loaded.get_subwords(i.min(dict.nwords() - 1)),
                       dict.get_subwords(i.min(dict.nwords() - 1)));
            assert_eq!(loaded.get_id(dict.get_word(i)), i);
        }
    }

    #[test]
    fn prune_keeps_labels_and_selected_words() {
        let mut args = small_args();
        args.model = ModelName::Sup;
        args.minn = 0;
        args.maxn = 0;
        let mut dict = Dictionary::new(&args);
        dict.read_from_file(&mut reader("a a a b b c __label__x d"))
            .unwrap();
        assert!(!dict.is_pruned());

        let a = dict.get_id("a");
        let c = dict.get_id("c");
        let mut idx = vec![c, a];
        dict.prune(&mut idx);

        assert!(dict.is_pruned());
        assert_eq!(dict.nwords(), 2);
        assert_eq!(dict.nlabels(), 1);
        assert_eq!(dict.size(), 3);
        assert_eq!(idx, vec![a.min(c), a.max(c)]);
        assert!(dict.get_id("a") >= 0);
        assert!(dict.get_id("c") >= 0);
        assert_eq!(dict.get_id("b"), -1);
        assert_eq!(dict.get_id("d"), -1);
        assert_eq!(dict.get_label(0).unwrap(), "__label__x");
    }
}
