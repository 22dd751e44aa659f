use std::io::{Read, Write};
use std::sync::atomic::{AtomicU32, Ordering};

use aligned_box::AlignedBox;
use anyhow::{bail, ensure, Context, Result};

use crate::binio;
use crate::quant::ProductQuantizer;
use crate::rng::Rng;

/// An `f32` cell that many threads may read and write without locks.
///
/// Loads and stores are relaxed: concurrent `add` calls can lose updates.
/// That is the Hogwild bargain; SGD tolerates the staleness as noise, and
/// tests check convergence, not the absence of races.
#[derive(Default)]
#[repr(transparent)]
pub struct Real {
    bits: AtomicU32,
}

impl Real {
    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }

    pub fn set(&self, value: f32) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn add(&self, x: f32) {
        self.set(self.get() + x);
    }
}

/// Row-major float matrix, the only directly mutable variant.
pub struct DenseMatrix {
    m: usize,
    n: usize,
    data: AlignedBox<[Real]>,
}

impl DenseMatrix {
    pub fn new(m: usize, n: usize) -> DenseMatrix {
        // the aligned allocator cannot hand out zero-size blocks
        let len = (m * n).max(1);
        DenseMatrix {
            m,
            n,
            data: AlignedBox::slice_from_default(128, len).expect("memory allocation failed"),
        }
    }

    pub fn rows(&self) -> usize {
        self.m
    }

    pub fn cols(&self) -> usize {
        self.n
    }

    pub fn zero(&self) {
        for x in self.data.iter() {
            x.set(0.0);
        }
    }

    /// Fills the matrix with uniform values in [-a, a), from a fixed seed so
    /// two runs with identical inputs start from identical weights.
    pub fn uniform(&self, a: f32) {
        let mut rng = Rng::new(1);
        for x in self.data.iter() {
            x.set(rng.f32() * 2.0 * a - a);
        }
    }

    pub fn at(&self, i: usize, j: usize) -> f32 {
        self.data[i * self.n + j].get()
    }

    pub fn set_at(&self, i: usize, j: usize, v: f32) {
        self.data[i * self.n + j].set(v);
    }

    pub fn dot_row(&self, vec: &[f32], i: usize) -> Result<f32> {
        debug_assert!(i < self.m);
        debug_assert_eq!(vec.len(), self.n);
        let row = &self.data[i * self.n..(i + 1) * self.n];
        let d: f32 = row.iter().zip(vec.iter()).map(|(x, &v)| x.get() * v).sum();
        ensure!(!d.is_nan(), "Encountered NaN.");
        Ok(d)
    }

    pub fn add_vector_to_row(&self, vec: &[f32], i: usize, a: f32) {
        debug_assert!(i < self.m);
        debug_assert_eq!(vec.len(), self.n);
        let row = &self.data[i * self.n..(i + 1) * self.n];
        for (x, &v) in row.iter().zip(vec.iter()) {
            x.add(a * v);
        }
    }

    pub fn add_row_to_vector(&self, x: &mut [f32], i: usize, a: f32) {
        debug_assert!(i < self.m);
        debug_assert_eq!(x.len(), self.n);
        let row = &self.data[i * self.n..(i + 1) * self.n];
        for (x, v) in x.iter_mut().zip(row.iter()) {
            *x += a * v.get();
        }
    }

    pub fn l2_norm_row(&self, i: usize) -> Result<f32> {
        let row = &self.data[i * self.n..(i + 1) * self.n];
        let norm: f32 = row.iter().map(|x| x.get() * x.get()).sum();
        ensure!(!norm.is_nan(), "Encountered NaN.");
        Ok(norm.sqrt())
    }

    pub fn l2_norm_rows(&self, norms: &mut [f32]) -> Result<()> {
        debug_assert_eq!(norms.len(), self.m);
        for i in 0..self.m {
            norms[i] = self.l2_norm_row(i)?;
        }
        Ok(())
    }

    pub fn divide_rows(&self, denoms: &[f32]) {
        debug_assert_eq!(denoms.len(), self.m);
        for i in 0..self.m {
            let d = denoms[i];
            if d != 0.0 {
                let row = &self.data[i * self.n..(i + 1) * self.n];
                for x in row.iter() {
                    x.set(x.get() / d);
                }
            }
        }
    }

    /// Copies the contents out as plain floats (quantizer input).
    pub fn to_vec(&self) -> Vec<f32> {
        self.data.iter().map(Real::get).collect()
    }

    pub fn save<W: Write>(&self, w: &mut W) -> Result<()> {
        binio::write_i64(w, self.m as i64)?;
        binio::write_i64(w, self.n as i64)?;
        let mut row = vec![0.0f32; self.n];
        for i in 0..self.m {
            for (j, x) in row.iter_mut().enumerate() {
                *x = self.at(i, j);
            }
            binio::write_f32s(w, &row)?;
        }
        Ok(())
    }

    pub fn load<R: Read>(r: &mut R) -> Result<DenseMatrix> {
        let m = binio::read_i64(r).context("error reading matrix block")? as usize;
        let n = binio::read_i64(r)? as usize;
        let mat = DenseMatrix::new(m, n);
        let mut row = vec![0.0f32; n];
        for i in 0..m {
            binio::read_f32s(r, &mut row).context("error reading matrix payload")?;
            for (j, &x) in row.iter().enumerate() {
                mat.set_at(i, j, x);
            }
        }
        Ok(mat)
    }

    pub fn dump<W: Write>(&self, w: &mut W) -> Result<()> {
        writeln!(w, "{} {}", self.m, self.n)?;
        for i in 0..self.m {
            for j in 0..self.n {
                if j > 0 {
                    write!(w, " ")?;
                }
                write!(w, "{}", self.at(i, j))?;
            }
            writeln!(w)?;
        }
        Ok(())
    }
}

/// Compressed, read-only matrix derived once from a dense one.
///
/// Rows are product-quantization codes, optionally rescaled by a separately
/// quantized row norm. There is no write path by design.
pub struct QuantMatrix {
    m: usize,
    n: usize,
    codesize: usize,
    codes: Vec<u8>,
    pq: ProductQuantizer,
    norm_codes: Vec<u8>,
    npq: Option<ProductQuantizer>,
    qnorm: bool,
}

impl QuantMatrix {
    /// Consumes a dense matrix and compresses it.
    pub fn quantize(mat: DenseMatrix, dsub: usize, qnorm: bool) -> Result<QuantMatrix> {
        let m = mat.rows();
        let n = mat.cols();
        let codesize = m * ((n + dsub - 1) / dsub);
        let mut codes = vec![0u8; codesize];
        let mut pq = ProductQuantizer::new(n, dsub);

        let mut norm_codes = Vec::new();
        let mut npq = None;
        if qnorm {
            let mut norms = vec![0.0f32; m];
            mat.l2_norm_rows(&mut norms)?;
            mat.divide_rows(&norms);

            let mut q = ProductQuantizer::new(1, 1);
            q.train(m, &norms)?;
            norm_codes = vec![0u8; m];
            q.compute_codes(&norms, &mut norm_codes, m);
            npq = Some(q);
        }

        let data = mat.to_vec();
        pq.train(m, &data)?;
        pq.compute_codes(&data, &mut codes, m);

        Ok(QuantMatrix {
            m,
            n,
            codesize,
            codes,
            pq,
            norm_codes,
            npq,
            qnorm,
        })
    }

    pub fn rows(&self) -> usize {
        self.m
    }

    pub fn cols(&self) -> usize {
        self.n
    }

    fn norm_of(&self, i: usize) -> f32 {
        match &self.npq {
            Some(npq) => npq.get_centroids(0, self.norm_codes[i])[0],
            None => 1.0,
        }
    }

    pub fn dot_row(&self, vec: &[f32], i: usize) -> Result<f32> {
        debug_assert!(i < self.m);
        debug_assert_eq!(vec.len(), self.n);
        Ok(self.pq.mul_code(vec, &self.codes, i, self.norm_of(i)))
    }

    pub fn add_row_to_vector(&self, x: &mut [f32], i: usize, a: f32) {
        self.pq.add_code(x, &self.codes, i, a * self.norm_of(i));
    }

    pub fn save<W: Write>(&self, w: &mut W) -> Result<()> {
        binio::write_bool(w, self.qnorm)?;
        binio::write_i64(w, self.m as i64)?;
        binio::write_i64(w, self.n as i64)?;
        binio::write_i32(w, self.codesize as i32)?;
        w.write_all(&self.codes)?;
        self.pq.save(w)?;
        if let Some(npq) = &self.npq {
            w.write_all(&self.norm_codes)?;
            npq.save(w)?;
        }
        Ok(())
    }

    pub fn load<R: Read>(r: &mut R) -> Result<QuantMatrix> {
        let qnorm = binio::read_bool(r).context("error reading quantized matrix block")?;
        let m = binio::read_i64(r)? as usize;
        let n = binio::read_i64(r)? as usize;
        let codesize = binio::read_i32(r)? as usize;
        let mut codes = vec![0u8; codesize];
        r.read_exact(&mut codes)
            .context("error reading quantized matrix codes")?;
        let pq = ProductQuantizer::load(r)?;
        let mut norm_codes = Vec::new();
        let mut npq = None;
        if qnorm {
            norm_codes = vec![0u8; m];
            r.read_exact(&mut norm_codes)
                .context("error reading quantized norm codes")?;
            npq = Some(ProductQuantizer::load(r)?);
        }
        Ok(QuantMatrix {
            m,
            n,
            codesize,
            codes,
            pq,
            norm_codes,
            npq,
            qnorm,
        })
    }
}

/// The capability set the rest of the engine programs against.
pub enum Matrix {
    Dense(DenseMatrix),
    Quant(QuantMatrix),
}

impl Matrix {
    pub fn rows(&self) -> usize {
        match self {
            Matrix::Dense(m) => m.rows(),
            Matrix::Quant(m) => m.rows(),
        }
    }

    pub fn cols(&self) -> usize {
        match self {
            Matrix::Dense(m) => m.cols(),
            Matrix::Quant(m) => m.cols(),
        }
    }

    pub fn dot_row(&self, vec: &[f32], i: usize) -> Result<f32> {
        match self {
            Matrix::Dense(m) => m.dot_row(vec, i),
            Matrix::Quant(m) => m.dot_row(vec, i),
        }
    }

    pub fn add_vector_to_row(&self, vec: &[f32], i: usize, a: f32) -> Result<()> {
        match self {
            Matrix::Dense(m) => {
                m.add_vector_to_row(vec, i, a);
                Ok(())
            }
            Matrix::Quant(_) => bail!("Operation not permitted on quantized matrices."),
        }
    }

    pub fn add_row_to_vector(&self, x: &mut [f32], i: usize) {
        match self {
            Matrix::Dense(m) => m.add_row_to_vector(x, i, 1.0),
            Matrix::Quant(m) => m.add_row_to_vector(x, i, 1.0),
        }
    }

    pub fn add_row_to_vector_scaled(&self, x: &mut [f32], i: usize, a: f32) {
        match self {
            Matrix::Dense(m) => m.add_row_to_vector(x, i, a),
            Matrix::Quant(m) => m.add_row_to_vector(x, i, a),
        }
    }

    pub fn save<W: Write>(&self, w: &mut W) -> Result<()> {
        match self {
            Matrix::Dense(m) => m.save(w),
            Matrix::Quant(m) => m.save(w),
        }
    }

    pub fn load<R: Read>(r: &mut R, quant: bool) -> Result<Matrix> {
        Ok(if quant {
            Matrix::Quant(QuantMatrix::load(r)?)
        } else {
            Matrix::Dense(DenseMatrix::load(r)?)
        })
    }

    pub fn dump<W: Write>(&self, w: &mut W) -> Result<()> {
        match self {
            Matrix::Dense(m) => m.dump(w),
            Matrix::Quant(_) => bail!("Operation not permitted on quantized matrices."),
        }
    }

    pub fn as_dense(&self) -> Option<&DenseMatrix> {
        match self {
            Matrix::Dense(m) => Some(m),
            Matrix::Quant(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn dense_dot_and_add() {
        let mat = DenseMatrix::new(2, 3);
        mat.set_at(0, 0, 1.0);
        mat.set_at(0, 1, 2.0);
        mat.set_at(0, 2, 3.0);
        mat.add_vector_to_row(&[1.0, 1.0, 1.0], 1, 0.5);

        assert_eq!(mat.dot_row(&[1.0, 1.0, 1.0], 0).unwrap(), 6.0);
        assert_eq!(mat.dot_row(&[2.0, 0.0, 0.0], 1).unwrap(), 1.0);

        let mut acc = vec![0.0f32; 3];
        mat.add_row_to_vector(&mut acc, 0, 2.0);
        assert_eq!(acc, vec![2.0, 4.0, 6.0]);
    }

    #[test]
    fn dense_nan_is_fatal() {
        let mat = DenseMatrix::new(1, 2);
        mat.set_at(0, 0, f32::NAN);
        assert!(mat.dot_row(&[1.0, 1.0], 0).is_err());
        assert!(mat.l2_norm_row(0).is_err());
    }

    #[test]
    fn uniform_is_seeded_and_bounded() {
        let a = DenseMatrix::new(4, 4);
        let b = DenseMatrix::new(4, 4);
        a.uniform(0.25);
        b.uniform(0.25);
        for i in 0..4 {
            for j in 0..4 {
                assert_eq!(a.at(i, j), b.at(i, j));
                assert!(a.at(i, j).abs() <= 0.25);
            }
        }
    }

    #[test]
    fn dense_save_load_bit_exact() {
        let mat = DenseMatrix::new(3, 2);
        mat.uniform(1.0);
        let mut buf = Vec::new();
        mat.save(&mut buf).unwrap();
        let loaded = DenseMatrix::load(&mut Cursor::new(buf)).unwrap();
        assert_eq!(loaded.rows(), 3);
        assert_eq!(loaded.cols(), 2);
        for i in 0..3 {
            for j in 0..2 {
                assert_eq!(loaded.at(i, j).to_bits(), mat.at(i, j).to_bits());
            }
        }
    }

    fn prototype_matrix(m: usize, n: usize) -> DenseMatrix {
        let mat = DenseMatrix::new(m, n);
        for i in 0..m {
            let scale = match i % 4 {
                0 => 1.0,
                1 => -1.0,
                2 => 0.5,
                _ => -0.25,
            };
            for j in 0..n {
                mat.set_at(i, j, scale);
            }
        }
        mat
    }

    #[test]
    fn quantized_matrix_approximates_dense() {
        let dense = prototype_matrix(300, 8);
        let expected: Vec<f32> = (0..300)
            .map(|i| dense.dot_row(&[1.0; 8], i).unwrap())
            .collect();
        let quant = QuantMatrix::quantize(dense, 2, false).unwrap();
        for (i, &e) in expected.iter().enumerate() {
            let got = quant.dot_row(&[1.0; 8], i).unwrap();
            assert!((got - e).abs() < 1e-2, "row {i}: {got} vs {e}");
        }
    }

    #[test]
    fn quantized_matrix_with_norms_round_trips() {
        let dense = prototype_matrix(300, 8);
        let expected: Vec<f32> = (0..300)
            .map(|i| dense.dot_row(&[1.0; 8], i).unwrap())
            .collect();
        let quant = QuantMatrix::quantize(dense, 2, true).unwrap();

        let mut buf = Vec::new();
        quant.save(&mut buf).unwrap();
        let loaded = QuantMatrix::load(&mut Cursor::new(buf)).unwrap();
        for (i, &e) in expected.iter().enumerate() {
            let got = loaded.dot_row(&[1.0; 8], i).unwrap();
            assert!((got - e).abs() < 2e-2, "row {i}: {got} vs {e}");
            assert_eq!(got, quant.dot_row(&[1.0; 8], i).unwrap());
        }
    }

    #[test]
    fn quantized_matrix_rejects_writes() {
        let dense = prototype_matrix(300, 8);
        let mat = Matrix::Quant(QuantMatrix::quantize(dense, 2, false).unwrap());
        assert!(mat.add_vector_to_row(&[0.0; 8], 0, 1.0).is_err());
        assert!(mat.dump(&mut Vec::new()).is_err());
    }
}
