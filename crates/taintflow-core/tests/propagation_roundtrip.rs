use taintflow_core::{CONST_LABEL, Label, TaintRuntime, TaintSource};

#[derive(Clone, Copy, Debug)]
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        // xorshift64*
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    fn gen_range_usize(&mut self, low: usize, high_inclusive: usize) -> usize {
        assert!(low <= high_inclusive);
        let span = high_inclusive - low + 1;
        low + (self.next_u64() as usize % span)
    }
}

const INPUT_LEN: usize = 64;

fn fresh_runtime() -> (TaintRuntime, Vec<u8>) {
    let bytes: Vec<u8> = (0..INPUT_LEN as u8).collect();
    let rt = TaintRuntime::with_heap_storage(1 << 14, TaintSource::from_bytes(&bytes));
    (rt, bytes)
}

/// Store/load round trips over every aligned window of the seeded input:
/// whatever label a load produced, storing it and loading it again must
/// produce the same label.
#[test]
fn load_store_load_is_identity_over_input_windows() {
    let (rt, bytes) = fresh_runtime();
    for width in [1usize, 2, 4, 8] {
        for start in (0..INPUT_LEN - width).step_by(3) {
            let cells: Vec<Label> = (0..width).map(|i| (start + i + 1) as Label).collect();
            let window = &bytes[start..start + width];
            let loaded = rt.union_load(&cells, window);
            let mut stored = vec![CONST_LABEL; width];
            rt.union_store(loaded, &mut stored);
            let reloaded = rt.union_load(&stored, window);
            assert_eq!(
                loaded, reloaded,
                "width={width} start={start}: round trip changed the label"
            );
        }
    }
}

/// Randomized mixed sequences of unions, stores, and loads keep the two
/// structural invariants: derived labels dominate their sub-labels, and
/// structurally equal records share an id.
#[test]
fn random_propagation_sequences_hold_dag_invariants() {
    const SEEDS: [u64; 4] = [1, 2, 3, 4];
    const STEPS: usize = 500;

    // Operators exercised with (op, size) pairs the instrumentation emits.
    const OPS: [(u16, u16); 6] = [(8, 8), (9, 8), (10, 8), (14, 16), (15, 16), (16, 32)];

    for seed in SEEDS {
        let (rt, bytes) = fresh_runtime();
        let mut shadow: Vec<Label> = (1..=INPUT_LEN as Label).collect();
        let mut produced: Vec<Label> = Vec::new();

        for step in 0..STEPS {
            match rng_op(seed, step) {
                0 => {
                    let mut rng = XorShift64::new(seed ^ step as u64 | 1);
                    let a = pick_label(&mut rng, &produced, INPUT_LEN);
                    let b = pick_label(&mut rng, &produced, INPUT_LEN);
                    let (op, size) = OPS[rng.gen_range_usize(0, OPS.len() - 1)];
                    let l = rt.union(a, b, op, size, 0, 0);
                    if l != CONST_LABEL {
                        let info = rt.store().get(l);
                        assert!(
                            l > info.l1 && l > info.l2,
                            "seed={seed} step={step}: derived label must dominate sub-labels"
                        );
                        // Hash-consing: the same union again is the same id.
                        assert_eq!(l, rt.union(a, b, op, size, 0, 0));
                        produced.push(l);
                    }
                }
                1 => {
                    let mut rng = XorShift64::new(seed ^ step as u64 | 1);
                    let width = [1usize, 2, 4][rng.gen_range_usize(0, 2)];
                    let start = rng.gen_range_usize(0, INPUT_LEN - width);
                    let l = rt.union_load(&shadow[start..start + width], &bytes[start..start + width]);
                    if l != CONST_LABEL {
                        produced.push(l);
                    }
                }
                _ => {
                    let mut rng = XorShift64::new(seed ^ step as u64 | 1);
                    let l = pick_label(&mut rng, &produced, INPUT_LEN);
                    // Store at the label's own width so write-back of load
                    // shapes never reaches past the seeded labels.
                    let width = (rt.store().get(l).size as usize / 8).clamp(1, 4);
                    let start = rng.gen_range_usize(0, INPUT_LEN - width);
                    rt.union_store(l, &mut shadow[start..start + width]);
                }
            }
        }
    }
}

fn rng_op(seed: u64, step: usize) -> usize {
    XorShift64::new(seed.wrapping_add(step as u64).wrapping_mul(0x9E37_79B9) | 1)
        .gen_range_usize(0, 2)
}

fn pick_label(rng: &mut XorShift64, produced: &[Label], input_len: usize) -> Label {
    if !produced.is_empty() && rng.gen_range_usize(0, 1) == 1 {
        produced[rng.gen_range_usize(0, produced.len() - 1)]
    } else {
        rng.gen_range_usize(1, input_len) as Label
    }
}
