// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Minimal square matrix of `f64`s: generation, multiplication and a flat
//! native-endian file format, just enough to drive the master/worker
//! demonstrator (SPEC_FULL.md §4.G). Matrix generation and pretty-printing
//! utilities beyond this are out of scope (spec Non-goals).

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::fail::Fail;

/// A square matrix stored in row-major order.
#[derive(Clone, Debug, PartialEq)]
pub struct Matrix {
    pub size: usize,
    data: Vec<f64>,
}

impl Matrix {
    pub fn zeros(size: usize) -> Self {
        Self {
            size,
            data: vec![0.0; size * size],
        }
    }

    /// Fills a `size x size` matrix with pseudo-random values in `[0, 1)`.
    pub fn random(size: usize, seed: u64) -> Self {
        let mut rng = SmallRng::seed_from_u64(seed);
        let data = (0..size * size).map(|_| rng.gen::<f64>()).collect();
        Self { size, data }
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.size + col]
    }

    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self.data[row * self.size + col] = value;
    }

    pub fn row(&self, row: usize) -> &[f64] {
        &self.data[row * self.size..(row + 1) * self.size]
    }

    /// Computes `self * other` in full. The master never calls this
    /// directly; it is what each worker does for the single row assigned
    /// to it.
    pub fn multiply(&self, other: &Matrix) -> Matrix {
        assert_eq!(self.size, other.size, "matrix sizes must match");
        let n = self.size;
        let mut out = Matrix::zeros(n);
        for i in 0..n {
            for k in 0..n {
                let a = self.get(i, k);
                if a == 0.0 {
                    continue;
                }
                for j in 0..n {
                    out.data[i * n + j] += a * other.get(k, j);
                }
            }
        }
        out
    }

    /// Multiplies a single row of `self` against all of `other`, returning
    /// the resulting row. This is the unit of work a worker claims.
    pub fn multiply_row(&self, row: usize, other: &Matrix) -> Vec<f64> {
        let n = self.size;
        let mut out = vec![0.0; n];
        for (k, &a) in self.row(row).iter().enumerate() {
            if a == 0.0 {
                continue;
            }
            for j in 0..n {
                out[j] += a * other.get(k, j);
            }
        }
        out
    }

    /// Encodes one row as a flat native-endian byte buffer, the payload
    /// carried in a `work_result_<row>` tuple.
    pub fn encode_row(row: &[f64]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(row.len() * 8);
        for v in row {
            buf.extend_from_slice(&v.to_ne_bytes());
        }
        buf
    }

    /// Decodes a row previously encoded with [`Matrix::encode_row`].
    pub fn decode_row(bytes: &[u8]) -> Result<Vec<f64>, Fail> {
        if bytes.len() % 8 != 0 {
            return Err(Fail::ShortRead {
                expected: bytes.len() + (8 - bytes.len() % 8),
                got: bytes.len(),
            });
        }
        Ok(bytes
            .chunks_exact(8)
            .map(|c| f64::from_ne_bytes(c.try_into().expect("chunk is exactly 8 bytes")))
            .collect())
    }

    /// Writes the matrix to `path` as a native-endian `{rows: i32, cols: i32}`
    /// header followed by `rows * cols` native-endian `f64`s, row-major.
    /// Always square here (`rows == cols == size`), but the header carries
    /// both fields to match the on-disk format the worker reads.
    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<(), io::Error> {
        let file = File::create(path)?;
        let mut w = BufWriter::new(file);
        w.write_all(&(self.size as i32).to_ne_bytes())?;
        w.write_all(&(self.size as i32).to_ne_bytes())?;
        for v in &self.data {
            w.write_all(&v.to_ne_bytes())?;
        }
        w.flush()
    }

    /// Reads a matrix previously written by [`Matrix::write_to`].
    pub fn read_from(path: impl AsRef<Path>) -> Result<Self, io::Error> {
        let file = File::open(path)?;
        let mut r = BufReader::new(file);
        let mut rows_buf = [0u8; 4];
        let mut cols_buf = [0u8; 4];
        r.read_exact(&mut rows_buf)?;
        r.read_exact(&mut cols_buf)?;
        let rows = i32::from_ne_bytes(rows_buf) as usize;
        let cols = i32::from_ne_bytes(cols_buf) as usize;
        let mut data = Vec::with_capacity(rows * cols);
        let mut value_buf = [0u8; 8];
        for _ in 0..rows * cols {
            r.read_exact(&mut value_buf)?;
            data.push(f64::from_ne_bytes(value_buf));
        }
        Ok(Self { size: rows, data })
    }
}
