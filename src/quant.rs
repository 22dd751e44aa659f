use std::io::{Read, Write};

use anyhow::{bail, Context, Result};

use crate::binio;
use crate::rng::Rng;

const NBITS: usize = 8;
pub const KSUB: usize = 1 << NBITS;
const MAX_POINTS_PER_CLUSTER: usize = 256;
const MAX_POINTS: usize = MAX_POINTS_PER_CLUSTER * KSUB;
const SEED: u64 = 1234;
const NITER: usize = 25;
const EPS: f32 = 1e-7;

/// Lossy vector codec: each row is split into `nsubq` contiguous subvectors
/// and every subvector is replaced by the index of its nearest centroid in a
/// 256-entry codebook trained by k-means.
pub struct ProductQuantizer {
    dim: usize,
    nsubq: usize,
    dsub: usize,
    lastdsub: usize,
    centroids: Vec<f32>,
    rng: Rng,
}

fn dist_l2(x: &[f32], y: &[f32]) -> f32 {
    x.iter()
        .zip(y.iter())
        .map(|(&a, &b)| (a - b) * (a - b))
        .sum()
}

/// Nearest centroid of `x` among the `KSUB` candidates packed in `centroids`.
fn assign_centroid(x: &[f32], centroids: &[f32], d: usize) -> (u8, f32) {
    let mut code = 0u8;
    let mut dis = dist_l2(x, &centroids[..d]);
    for j in 1..KSUB {
        let disij = dist_l2(x, &centroids[j * d..j * d + d]);
        if disij < dis {
            code = j as u8;
            dis = disij;
        }
    }
    (code, dis)
}

fn estep(x: &[f32], centroids: &[f32], codes: &mut [u8], d: usize, n: usize) {
    for i in 0..n {
        codes[i] = assign_centroid(&x[i * d..i * d + d], centroids, d).0;
    }
}

fn mstep(rng: &mut Rng, x: &[f32], centroids: &mut [f32], codes: &[u8], d: usize, n: usize) {
    let mut nelts = [0i32; KSUB];
    centroids[..d * KSUB].fill(0.0);

    for i in 0..n {
        let k = codes[i] as usize;
        for j in 0..d {
            centroids[k * d + j] += x[i * d + j];
        }
        nelts[k] += 1;
    }

    for k in 0..KSUB {
        let z = nelts[k] as f32;
        if z != 0.0 {
            for j in 0..d {
                centroids[k * d + j] /= z;
            }
        }
    }

    // Empty-cluster repair: pick a populated cluster with probability
    // proportional to its size, split it, and nudge the twins apart.
    for k in 0..KSUB {
        if nelts[k] == 0 {
            let mut m = 0;
            while rng.f32() * (n - KSUB) as f32 >= nelts[m] as f32 - 1.0 {
                m = (m + 1) % KSUB;
            }
            centroids.copy_within(m * d..m * d + d, k * d);
            for j in 0..d {
                let sign = ((j % 2) * 2) as f32 - 1.0;
                centroids[k * d + j] += sign * EPS;
                centroids[m * d + j] -= sign * EPS;
            }
            nelts[k] = nelts[m] / 2;
            nelts[m] -= nelts[k];
        }
    }
}

fn kmeans(rng: &mut Rng, x: &[f32], centroids: &mut [f32], n: usize, d: usize) {
    let mut perm: Vec<usize> = (0..n).collect();
    rng.shuffle(&mut perm);
    for i in 0..KSUB {
        centroids[i * d..i * d + d].copy_from_slice(&x[perm[i] * d..perm[i] * d + d]);
    }

    let mut codes = vec![0u8; n];
    for _ in 0..NITER {
        estep(x, centroids, &mut codes, d, n);
        mstep(rng, x, centroids, &codes, d, n);
    }
}

impl ProductQuantizer {
    pub fn new(dim: usize, dsub: usize) -> ProductQuantizer {
        let mut nsubq = dim / dsub;
        let mut lastdsub = dim % dsub;
        if lastdsub == 0 {
            lastdsub = dsub;
        } else {
            nsubq += 1;
        }
        ProductQuantizer {
            dim,
            nsubq,
            dsub,
            lastdsub,
            centroids: vec![0.0; dim * KSUB],
            rng: Rng::new(SEED),
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn nsubq(&self) -> usize {
        self.nsubq
    }

    /// Subvector width of slot `m`; only the last slot may be shorter.
    fn dsub_of(&self, m: usize) -> usize {
        if m == self.nsubq - 1 {
            self.lastdsub
        } else {
            self.dsub
        }
    }

    fn centroid_index(&self, m: usize, i: u8) -> usize {
        if m == self.nsubq - 1 {
            m * KSUB * self.dsub + i as usize * self.lastdsub
        } else {
            (m * KSUB + i as usize) * self.dsub
        }
    }

    /// Centroid `i` of subvector slot `m`.
    pub fn get_centroids(&self, m: usize, i: u8) -> &[f32] {
        let d = self.dsub_of(m);
        let index = self.centroid_index(m, i);
        &self.centroids[index..index + d]
    }

    /// Trains one codebook per subvector slot from at most `MAX_POINTS`
    /// sampled rows of `x` (row-major, `n` rows of `dim` floats).
    pub fn train(&mut self, n: usize, x: &[f32]) -> Result<()> {
        if n < KSUB {
            bail!("Matrix too small for quantization, must have at least {KSUB} rows");
        }
        let np = n.min(MAX_POINTS);
        let mut perm: Vec<usize> = (0..n).collect();
        let mut xslice = vec![0.0f32; np * self.dsub];

        for m in 0..self.nsubq {
            let d = self.dsub_of(m);
            if np != n {
                self.rng.shuffle(&mut perm);
            }
            for j in 0..np {
                let src = perm[j] * self.dim + m * self.dsub;
                xslice[j * d..j * d + d].copy_from_slice(&x[src..src + d]);
            }
            let index = self.centroid_index(m, 0);
            kmeans(
                &mut self.rng,
                &xslice[..np * d],
                &mut self.centroids[index..index + KSUB * d],
                np,
                d,
            );
        }
        Ok(())
    }

    /// Approximate `dot(x, row t) * alpha` from the row's byte code.
    pub fn mul_code(&self, x: &[f32], codes: &[u8], t: usize, alpha: f32) -> f32 {
        let mut res = 0.0;
        let code = &codes[self.nsubq * t..];
        for m in 0..self.nsubq {
            let d = self.dsub_of(m);
            let c = self.get_centroids(m, code[m]);
            for n in 0..d {
                res += x[m * self.dsub + n] * c[n];
            }
        }
        res * alpha
    }

    /// Accumulate `alpha * row t` (reconstructed from its code) into `x`.
    pub fn add_code(&self, x: &mut [f32], codes: &[u8], t: usize, alpha: f32) {
        let code = &codes[self.nsubq * t..];
        for m in 0..self.nsubq {
            let d = self.dsub_of(m);
            let c = self.get_centroids(m, code[m]);
            for n in 0..d {
                x[m * self.dsub + n] += alpha * c[n];
            }
        }
    }

    pub fn compute_code(&self, x: &[f32], code: &mut [u8]) {
        for m in 0..self.nsubq {
            let d = self.dsub_of(m);
            let index = self.centroid_index(m, 0);
            code[m] = assign_centroid(
                &x[m * self.dsub..m * self.dsub + d],
                &self.centroids[index..index + KSUB * d],
                d,
            )
            .0;
        }
    }

    pub fn compute_codes(&self, x: &[f32], codes: &mut [u8], n: usize) {
        for i in 0..n {
            let row = &x[i * self.dim..(i + 1) * self.dim];
            self.compute_code(row, &mut codes[i * self.nsubq..(i + 1) * self.nsubq]);
        }
    }

    pub fn save<W: Write>(&self, w: &mut W) -> Result<()> {
        binio::write_i32(w, self.dim as i32)?;
        binio::write_i32(w, self.nsubq as i32)?;
        binio::write_i32(w, self.dsub as i32)?;
        binio::write_i32(w, self.lastdsub as i32)?;
        binio::write_f32s(w, &self.centroids)?;
        Ok(())
    }

    pub fn load<R: Read>(r: &mut R) -> Result<ProductQuantizer> {
        let dim = binio::read_i32(r).context("error reading quantizer block")? as usize;
        let nsubq = binio::read_i32(r)? as usize;
        let dsub = binio::read_i32(r)? as usize;
        let lastdsub = binio::read_i32(r)? as usize;
        let mut centroids = vec![0.0f32; dim * KSUB];
        binio::read_f32s(r, &mut centroids).context("error reading quantizer centroids")?;
        Ok(ProductQuantizer {
            dim,
            nsubq,
            dsub,
            lastdsub,
            centroids,
            rng: Rng::new(SEED),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    // Rows drawn from a small set of prototypes; with 256 centroids per
    // slot every prototype should be reconstructed almost exactly.
    fn prototype_rows(n: usize, dim: usize) -> Vec<f32> {
        let protos = [
            vec![1.0; 16],
            vec![-1.0; 16],
            vec![0.5; 16],
            vec![-0.25; 16],
        ];
        let mut x = Vec::with_capacity(n * dim);
        for i in 0..n {
            x.extend_from_slice(&protos[i % protos.len()][..dim]);
        }
        x
    }

    #[test]
    fn subvector_split() {
        let pq = ProductQuantizer::new(10, 4);
        assert_eq!(pq.nsubq(), 3);
        assert_eq!(pq.dsub_of(0), 4);
        assert_eq!(pq.dsub_of(2), 2);

        let pq = ProductQuantizer::new(8, 2);
        assert_eq!(pq.nsubq(), 4);
        assert_eq!(pq.dsub_of(3), 2);
    }

    #[test]
    fn too_few_rows_is_an_error() {
        let mut pq = ProductQuantizer::new(4, 2);
        let x = vec![0.0f32; 10 * 4];
        assert!(pq.train(10, &x).is_err());
    }

    #[test]
    fn encode_reconstruct_round_trip() {
        let n = 300;
        let dim = 8;
        let x = prototype_rows(n, dim);
        let mut pq = ProductQuantizer::new(dim, 2);
        pq.train(n, &x).unwrap();

        let mut codes = vec![0u8; n * pq.nsubq()];
        pq.compute_codes(&x, &mut codes, n);

        for i in 0..n {
            let row = &x[i * dim..(i + 1) * dim];
            let mut rec = vec![0.0f32; dim];
            pq.add_code(&mut rec, &codes, i, 1.0);
            for j in 0..dim {
                assert!(
                    (rec[j] - row[j]).abs() < 1e-3,
                    "row {i} component {j}: {} vs {}",
                    rec[j],
                    row[j]
                );
            }
            // mul_code against the row itself approximates its squared norm.
            let approx = pq.mul_code(row, &codes, i, 1.0);
            let exact: f32 = row.iter().map(|v| v * v).sum();
            assert!((approx - exact).abs() < 1e-2 * exact.max(1.0));
        }
    }

    #[test]
    fn save_load_round_trip() {
        let n = 256;
        let dim = 6;
        let x = prototype_rows(n, dim);
        let mut pq = ProductQuantizer::new(dim, 4);
        pq.train(n, &x).unwrap();

        let mut buf = Vec::new();
        pq.save(&mut buf).unwrap();
        let loaded = ProductQuantizer::load(&mut Cursor::new(buf)).unwrap();

        assert_eq!(loaded.dim, pq.dim);
        assert_eq!(loaded.nsubq, pq.nsubq);
        assert_eq!(loaded.dsub, pq.dsub);
        assert_eq!(loaded.lastdsub, pq.lastdsub);
        assert_eq!(loaded.centroids, pq.centroids);
    }
}
