//! Peephole graph rewrites, applied greedily to a fixed point.
//!
//! Each pass re-sorts the graph and applies the leftmost applicable rewrite,
//! then restarts. Every rewrite strictly reduces the operator count, so the
//! loop terminates after at most one pass per operator.

use anyhow::Result;
use tracing::debug;

use crate::operator::{OpId, Operation};

use super::Graph;

enum Rewrite {
    /// Two consecutive transposes with equal permute vectors cancel.
    InverseTranspose { first: OpId, second: OpId },
    /// A last-two-axes transpose feeding only a matmul folds into the
    /// matmul's transpose flag.
    TransposeIntoMatMul { transpose: OpId, matmul: OpId },
}

impl Graph {
    /// Runs the peephole rewrites until none applies.
    pub fn optimize(&mut self) -> Result<()> {
        loop {
            self.topo_sort()?;
            let Some(rewrite) = self.find_rewrite() else {
                break;
            };
            match rewrite {
                Rewrite::InverseTranspose { first, second } => {
                    debug!(first = first.0, second = second.0, "eliminating inverse transposes");
                    self.eliminate_inverse_transpose(first, second);
                }
                Rewrite::TransposeIntoMatMul { transpose, matmul } => {
                    debug!(transpose = transpose.0, matmul = matmul.0, "fusing transpose into matmul");
                    self.fuse_transpose_into_matmul(transpose, matmul);
                }
            }
        }
        Ok(())
    }

    fn find_rewrite(&self) -> Option<Rewrite> {
        for &id in self.op_ids() {
            let op = self.op(id);
            let Operation::Transpose(spec) = op.op() else {
                continue;
            };
            if op.successors().len() != 1 {
                continue;
            }
            let succ_id = op.successors()[0];
            match self.op(succ_id).op() {
                // Equal permute vectors: applying the permutation twice is
                // the identity for the self-inverse permutations this
                // rewrite targets (axis swaps).
                Operation::Transpose(other) if other.perm == spec.perm => {
                    return Some(Rewrite::InverseTranspose { first: id, second: succ_id });
                }
                Operation::MatMul(_) if spec.is_last_axes_swap() => {
                    return Some(Rewrite::TransposeIntoMatMul { transpose: id, matmul: succ_id });
                }
                _ => {}
            }
        }
        None
    }

    /// Removes transposes `first` and `second`, rewiring `first`'s input
    /// into every consumer of `second`'s output.
    fn eliminate_inverse_transpose(&mut self, first: OpId, second: OpId) {
        let x = self.op(first).input(0);
        let mid = self.op(first).output(0);
        let y = self.op(second).output(0);

        self.tensor_mut(x).remove_consumer(first);
        if let Some(producer) = self.tensor(x).producer() {
            self.op_mut(producer).remove_successor(first);
        }

        for consumer in self.tensor(y).consumers().to_vec() {
            self.op_mut(consumer).replace_input(y, x);
            self.op_mut(consumer).remove_predecessor(second);
            self.tensor_mut(x).add_consumer(consumer);
            if let Some(producer) = self.tensor(x).producer() {
                self.op_mut(consumer).add_predecessor(producer);
                self.op_mut(producer).add_successor(consumer);
            }
        }

        self.remove_tensor(mid);
        self.remove_tensor(y);
        self.remove_op(first);
        self.remove_op(second);
    }

    /// Absorbs `transpose` into `matmul` by flipping the matching
    /// `trans_a`/`trans_b` flag and wiring the transpose's input directly
    /// into the matmul.
    fn fuse_transpose_into_matmul(&mut self, transpose: OpId, matmul: OpId) {
        let x = self.op(transpose).input(0);
        let mid = self.op(transpose).output(0);
        let index = self
            .op(matmul)
            .inputs()
            .iter()
            .position(|&input| input == mid)
            .expect("matmul successor must read the transpose output");

        match self.op_mut(matmul).op_mut() {
            Operation::MatMul(spec) => {
                if index == 0 {
                    spec.trans_a = !spec.trans_a;
                } else {
                    spec.trans_b = !spec.trans_b;
                }
            }
            _ => unreachable!("rewrite matched a matmul"),
        }

        self.tensor_mut(x).remove_consumer(transpose);
        self.tensor_mut(x).add_consumer(matmul);
        self.op_mut(matmul).remove_predecessor(transpose);
        self.op_mut(matmul).replace_input(mid, x);
        if let Some(producer) = self.tensor(x).producer() {
            self.op_mut(producer).remove_successor(transpose);
            self.op_mut(producer).add_successor(matmul);
            self.op_mut(matmul).add_predecessor(producer);
        }

        self.remove_tensor(mid);
        self.remove_op(transpose);
    }
}
