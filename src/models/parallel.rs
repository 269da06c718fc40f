//! Multi-threaded mini-batch SGD.
//!
//! Every worker owns a [`Workspace`]: private copies of the layers, a forward
//! trace and gradient accumulators. The only state shared between workers is
//! [`SharedParameters`], the network's weights and biases stored as atomic
//! cells. Workers refresh their private weights from it before each batch
//! and publish each batch's SGD step back into it, under a mutex in
//! [`Consistency::Strict`] mode and without one in [`Consistency::Relaxed`].

use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::thread;

use tracing::{debug, trace};

use super::{batch_matrix, batch_ranges, check_lengths, layer_gradients, ForwardTrace};
use crate::core::optimizers::Step;
use crate::prelude::*;

/// `f64` stored in an `AtomicU64`. Loads and stores are individually atomic;
/// nothing orders them across cells.
struct AtomicF64(AtomicU64);

impl AtomicF64 {
    fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    #[inline]
    fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    #[inline]
    fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed)
    }
}

/// Row-major atomic copy of a matrix.
struct SharedMatrix {
    cells: Vec<AtomicF64>,
}

impl SharedMatrix {
    fn from_array(array: &Array2<f64>) -> Self {
        Self {
            cells: array.iter().map(|&v| AtomicF64::new(v)).collect(),
        }
    }

    fn read_into(&self, array: &mut Array2<f64>) {
        for (dst, cell) in array.iter_mut().zip(&self.cells) {
            *dst = cell.load();
        }
    }
}

struct SharedLayer {
    w: SharedMatrix,
    b: SharedMatrix,
}

pub(crate) struct SharedParameters {
    layers: Vec<SharedLayer>,
    consistency: Consistency,
    update_lock: Mutex<()>,
}

impl SharedParameters {
    fn new(layers: &[Layer], consistency: Consistency) -> Self {
        Self {
            layers: layers
                .iter()
                .map(|layer| SharedLayer {
                    w: SharedMatrix::from_array(layer.weights()),
                    b: SharedMatrix::from_array(layer.bias()),
                })
                .collect(),
            consistency,
            update_lock: Mutex::new(()),
        }
    }

    /// Copies the current shared weights and biases into `layers`.
    fn load_into(&self, layers: &mut [Layer]) {
        for (shared, layer) in self.layers.iter().zip(layers.iter_mut()).skip(1) {
            shared.w.read_into(layer.weights_mut());
            shared.b.read_into(layer.bias_mut());
        }
    }

    /// Publishes one SGD step computed from the accumulators of `layers`.
    fn apply(&self, layers: &[Layer], step: Step) {
        // The lock guards no data: it only keeps strict-mode updates from interleaving.
        let _guard = match self.consistency {
            Consistency::Strict => Some(self.update_lock.lock().unwrap_or_else(|e| e.into_inner())),
            Consistency::Relaxed => None,
        };
        for (shared, layer) in self.layers.iter().zip(layers).skip(1) {
            for (cell, &grad) in shared.w.cells.iter().zip(layer.nabla_w().iter()) {
                cell.store(step.weight(cell.load(), grad));
            }
            for (cell, grads) in shared.b.cells.iter().zip(layer.nabla_b().rows()) {
                let bias = grads.iter().fold(cell.load(), |b, &g| step.descend(b, g));
                cell.store(bias);
            }
        }
    }
}

/// Thread-private buffers of one worker.
struct Workspace {
    layers: Vec<Layer>,
    trace: ForwardTrace,
}

impl Workspace {
    fn new(layers: &[Layer]) -> Self {
        Self {
            layers: layers.iter().map(Layer::detached).collect(),
            trace: ForwardTrace::default(),
        }
    }

    fn run(&mut self, worker: usize, job: &Job<'_>, batches: &[Range<usize>]) -> Result<()> {
        debug!(worker, batches = batches.len(), "worker started");
        let units = self.layers.last().map_or(0, Layer::units);
        for range in batches {
            trace!(worker, start = range.start, end = range.end, "parallel batch");
            job.shared.load_into(&mut self.layers);
            let x = batch_matrix(&job.inputs[range.clone()])?;
            let target = encode_targets(&job.labels[range.clone()], units)?;
            Network::forward_trace(&self.layers, &x, &mut self.trace)?;
            let gradients = {
                let a: Vec<&Array2<f64>> = self.trace.a.iter().collect();
                let da: Vec<&Array2<f64>> = self.trace.da.iter().collect();
                layer_gradients(&self.layers, &a, &da, &target, job.cost)?
            };
            for (layer, (grad_w, delta)) in self.layers[1..].iter_mut().zip(gradients) {
                layer.accumulate(&grad_w, &delta);
            }
            job.shared.apply(&self.layers, job.config.step(range.len()));
            for layer in self.layers.iter_mut() {
                layer.clear_gradients();
            }
        }
        debug!(worker, "worker finished");
        Ok(())
    }
}

/// Read-only inputs every worker sees.
struct Job<'a> {
    inputs: &'a [Array2<f64>],
    labels: &'a [u8],
    cost: Cost,
    config: &'a SgdConfig,
    shared: &'a SharedParameters,
}

/// Splits `batches` into `workers` contiguous ranges of batch indices; the
/// first `batches % workers` workers get one extra batch.
pub(crate) fn split_batches(batches: usize, workers: usize) -> Vec<Range<usize>> {
    let workers = workers.clamp(1, batches.max(1));
    let base = batches / workers;
    let extra = batches % workers;
    let mut start = 0;
    (0..workers)
        .map(|w| {
            let len = base + usize::from(w < extra);
            let range = start..start + len;
            start += len;
            range
        })
        .collect()
}

impl Network {
    /// One epoch of parallel mini-batch SGD.
    ///
    /// Batches are formed exactly as in [`Network::sgd`] and handed out as
    /// contiguous ranges, one per worker thread. With a single worker in
    /// [`Consistency::Strict`] mode the resulting weights are bit-identical to
    /// [`Network::sgd`]. On error the network keeps its pre-epoch weights.
    pub fn psgd(
        &mut self,
        inputs: &[Array2<f64>],
        labels: &[u8],
        config: &SgdConfig,
        parallel: &ParallelConfig,
    ) -> Result<()> {
        config.validate()?;
        self.check_trainable()?;
        check_lengths(inputs, labels)?;

        let batches = batch_ranges(inputs.len(), config.batch_size);
        let assignments = split_batches(batches.len(), parallel.worker_count()?);
        debug!(
            workers = assignments.len(),
            batches = batches.len(),
            consistency = ?parallel.consistency,
            "starting parallel epoch"
        );

        let shared = SharedParameters::new(&self.layers, parallel.consistency);
        let job = Job {
            inputs,
            labels,
            cost: self.cost,
            config,
            shared: &shared,
        };
        let mut workspaces: Vec<Workspace> = assignments.iter().map(|_| Workspace::new(&self.layers)).collect();

        let results: Vec<Result<()>> = thread::scope(|s| {
            let handles: Vec<_> = workspaces
                .iter_mut()
                .zip(&assignments)
                .enumerate()
                .map(|(worker, (workspace, assigned))| {
                    let job = &job;
                    let batches = &batches[assigned.clone()];
                    s.spawn(move || workspace.run(worker, job, batches))
                })
                .collect();
            handles
                .into_iter()
                .enumerate()
                .map(|(worker, handle)| handle.join().unwrap_or(Err(NNError::WorkerPanicked(worker))))
                .collect()
        });
        results.into_iter().collect::<Result<Vec<()>>>()?;

        shared.load_into(&mut self.layers);
        Ok(())
    }
}
