//! C3-style linearization.
//!
//! The merge takes a set of already-linearized sequences and produces a
//! single order that preserves the relative order of every input sequence
//! (monotonicity) and of the direct-bases seed list (local precedence).
//! It is generic over the element type so the same algorithm linearizes
//! both specification nodes and class hierarchies.

/// The merge found no valid next candidate: every remaining head is
/// contradicted by the tail of some other sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeConflict<T> {
    /// The competing head candidates at the point of failure.
    pub candidates: Vec<T>,
}

/// C3-style merge of pre-linearized sequences.
///
/// Repeatedly selects the first head element that does not appear in the
/// tail of any remaining sequence, emits it, and removes it from every
/// sequence. Fails with [`MergeConflict`] when the sequences place
/// contradictory precedence demands on the remaining elements.
///
/// Each input sequence must be duplicate-free; the output then is too.
pub fn merge<T>(seqs: &[Vec<T>]) -> Result<Vec<T>, MergeConflict<T>>
where
    T: Copy + Eq,
{
    // Cursor per sequence; elements before the cursor are consumed.
    let mut heads: Vec<usize> = vec![0; seqs.len()];
    let total: usize = seqs.iter().map(Vec::len).sum();
    let mut out = Vec::with_capacity(total);

    loop {
        let mut exhausted = true;
        let mut taken = false;

        'candidates: for (i, seq) in seqs.iter().enumerate() {
            let Some(candidate) = seq.get(heads[i]) else {
                continue;
            };
            exhausted = false;

            // A candidate is valid only if no sequence still has it in its
            // tail (i.e. something else must come first there).
            for (j, other) in seqs.iter().enumerate() {
                let tail_start = heads[j] + 1;
                if other.len() > tail_start && other[tail_start..].contains(candidate) {
                    continue 'candidates;
                }
            }

            let candidate = *candidate;
            out.push(candidate);
            for (j, other) in seqs.iter().enumerate() {
                if other.get(heads[j]) == Some(&candidate) {
                    heads[j] += 1;
                }
            }
            taken = true;
            break;
        }

        if exhausted {
            return Ok(out);
        }
        if !taken {
            let candidates = seqs
                .iter()
                .enumerate()
                .filter_map(|(i, seq)| seq.get(heads[i]).copied())
                .collect();
            return Err(MergeConflict { candidates });
        }
    }
}

/// Enforce the root-pinning rule: strip every occurrence of `anchor` from
/// `seq` and append exactly one at the very end.
///
/// The root capability set is implicitly a base of every composition; in
/// diamond patterns mixing capability ancestors with plain composition
/// ancestors the generic merge can surface it early, so it is forced back
/// into its canonical least-specific, always-last position.
pub fn pin_last<T>(seq: &mut Vec<T>, anchor: T)
where
    T: Copy + Eq,
{
    seq.retain(|x| *x != anchor);
    seq.push(anchor);
}
