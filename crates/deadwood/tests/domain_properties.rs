//! Generator-driven checks of the universal lattice properties, run against
//! both domains over 1000 sampled inputs each.
//!
//! The generator is a seeded ChaCha stream so failures reproduce exactly.
//! Concrete values are small integers: enough to hit every sign and plenty
//! of interval overlap cases.

use deadwood::{BinaryOp, CmpCond, Domain, Interval, SignSet};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const SAMPLES: usize = 1000;
const CONDS: [CmpCond; 6] = [CmpCond::Eq, CmpCond::Ne, CmpCond::Lt, CmpCond::Le, CmpCond::Gt, CmpCond::Ge];
const OPS: [BinaryOp; 5] = [BinaryOp::Add, BinaryOp::Sub, BinaryOp::Mul, BinaryOp::Div, BinaryOp::Rem];

fn rng() -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(0x5EED_CAFE)
}

/// A small finite set of concrete values; may be empty.
fn sample(rng: &mut ChaCha8Rng) -> Vec<f64> {
    let len = rng.gen_range(0..6);
    (0..len).map(|_| f64::from(rng.gen_range(-50i32..=50))).collect()
}

/// A small non-empty set of concrete values.
fn sample_nonempty(rng: &mut ChaCha8Rng) -> Vec<f64> {
    let len = rng.gen_range(1..6);
    (0..len).map(|_| f64::from(rng.gen_range(-50i32..=50))).collect()
}

fn apply<D: Domain>(op: BinaryOp, a: &D, b: &D) -> D {
    match op {
        BinaryOp::Add => a.add(b),
        BinaryOp::Sub => a.sub(b),
        BinaryOp::Mul => a.mul(b),
        BinaryOp::Div => a.div(b),
        BinaryOp::Rem => a.rem(b),
    }
}

fn holds_concretely(cond: CmpCond, x: f64, y: f64) -> bool {
    match cond {
        CmpCond::Eq | CmpCond::Is => x == y,
        CmpCond::Ne | CmpCond::IsNot => x != y,
        CmpCond::Lt => x < y,
        CmpCond::Le => x <= y,
        CmpCond::Gt => x > y,
        CmpCond::Ge => x >= y,
    }
}

// =============================================================================
// Property: abstraction soundness
// =============================================================================

/// Every value of a finite set is contained in its abstraction.
fn check_alpha_soundness<D: Domain>() {
    let mut rng = rng();
    for _ in 0..SAMPLES {
        let values = sample(&mut rng);
        let abstracted = D::alpha(values.iter().copied());
        for v in &values {
            assert!(abstracted.contains(*v), "{v} missing from {abstracted} = alpha({values:?})");
        }
    }
}

#[test]
fn alpha_soundness_sign() {
    check_alpha_soundness::<SignSet>();
}

#[test]
fn alpha_soundness_interval() {
    check_alpha_soundness::<Interval>();
}

// =============================================================================
// Property: join is a least upper bound
// =============================================================================

/// `a ⊑ a ⊔ b`, `b ⊑ a ⊔ b`, and the join is below every common upper bound.
fn check_join_lub<D: Domain>() {
    let mut rng = rng();
    for _ in 0..SAMPLES {
        let a = D::alpha(sample(&mut rng));
        let b = D::alpha(sample(&mut rng));
        let join = a.join(&b);
        assert!(a.le(&join), "{a} not below {join}");
        assert!(b.le(&join), "{b} not below {join}");
        // Any upper bound of both dominates the join.
        let upper = join.join(&D::alpha(sample(&mut rng)));
        assert!(join.le(&upper), "{join} not below upper bound {upper}");
    }
}

#[test]
fn join_is_lub_sign() {
    check_join_lub::<SignSet>();
}

#[test]
fn join_is_lub_interval() {
    check_join_lub::<Interval>();
}

// =============================================================================
// Property: arithmetic is monotone
// =============================================================================

/// Growing either operand can only grow the result of every operation.
fn check_monotone_arithmetic<D: Domain>() {
    let mut rng = rng();
    for _ in 0..SAMPLES {
        let a = D::alpha(sample(&mut rng));
        let b = D::alpha(sample(&mut rng));
        let a_wide = a.join(&D::alpha(sample(&mut rng)));
        let b_wide = b.join(&D::alpha(sample(&mut rng)));
        for op in OPS {
            let narrow = apply(op, &a, &b);
            let wide = apply(op, &a_wide, &b_wide);
            assert!(narrow.le(&wide), "{op}: {narrow} not below {wide} for {a} vs {a_wide}, {b} vs {b_wide}");
        }
    }
}

#[test]
fn monotone_arithmetic_sign() {
    check_monotone_arithmetic::<SignSet>();
}

#[test]
fn monotone_arithmetic_interval() {
    check_monotone_arithmetic::<Interval>();
}

// =============================================================================
// Property: abstraction distributes over union
// =============================================================================

/// `alpha(S₁) ⊔ alpha(S₂) = alpha(S₁ ∪ S₂)` over finite sets.
fn check_distributive_alpha<D: Domain>() {
    let mut rng = rng();
    for _ in 0..SAMPLES {
        let s1 = sample(&mut rng);
        let s2 = sample(&mut rng);
        let joined = D::alpha(s1.iter().copied()).join(&D::alpha(s2.iter().copied()));
        let union = D::alpha(s1.iter().chain(s2.iter()).copied());
        assert!(joined == union, "alpha({s1:?}) ⊔ alpha({s2:?}) = {joined} != {union}");
    }
}

#[test]
fn distributive_alpha_sign() {
    check_distributive_alpha::<SignSet>();
}

#[test]
fn distributive_alpha_interval() {
    check_distributive_alpha::<Interval>();
}

// =============================================================================
// Property: constrain is sound
// =============================================================================

/// For every concrete pair drawn from the operands, the side the pair
/// satisfies still contains the left value, and both sides stay below `prev`.
fn check_constrain_soundness<D: Domain>() {
    let mut rng = rng();
    for _ in 0..SAMPLES {
        let s1 = sample_nonempty(&mut rng);
        let s2 = sample_nonempty(&mut rng);
        let prev = D::alpha(s1.iter().copied());
        let other = D::alpha(s2.iter().copied());
        for cond in CONDS {
            let (when_true, when_false) = D::constrain(&prev, &other, cond);
            assert!(when_true.le(&prev), "{cond}: true side {when_true} escapes {prev}");
            assert!(when_false.le(&prev), "{cond}: false side {when_false} escapes {prev}");
            for &x in &s1 {
                for &y in &s2 {
                    if holds_concretely(cond, x, y) {
                        assert!(
                            when_true.contains(x),
                            "{x} {cond} {y} holds but {x} missing from true side {when_true} of {prev} vs {other}"
                        );
                    } else {
                        assert!(
                            when_false.contains(x),
                            "{x} {cond} {y} fails but {x} missing from false side {when_false} of {prev} vs {other}"
                        );
                    }
                }
            }
        }
    }
}

#[test]
fn constrain_soundness_sign() {
    check_constrain_soundness::<SignSet>();
}

#[test]
fn constrain_soundness_interval() {
    check_constrain_soundness::<Interval>();
}

// =============================================================================
// Property: compare covers the concrete outcome
// =============================================================================

/// The abstract compare never rules out an outcome some concrete pair
/// realises, and is non-empty on non-bottom operands.
fn check_compare_soundness<D: Domain>() {
    let mut rng = rng();
    for _ in 0..SAMPLES {
        let s1 = sample_nonempty(&mut rng);
        let s2 = sample_nonempty(&mut rng);
        let a = D::alpha(s1.iter().copied());
        let b = D::alpha(s2.iter().copied());
        for cond in CONDS {
            let outcomes = a.compare(&b, cond);
            assert!(!outcomes.is_empty(), "{a} {cond} {b} has no outcome");
            for &x in &s1 {
                for &y in &s2 {
                    if holds_concretely(cond, x, y) {
                        assert!(outcomes.may_true, "{x} {cond} {y} holds but compare denies it");
                    } else {
                        assert!(outcomes.may_false, "{x} {cond} {y} fails but compare denies it");
                    }
                }
            }
        }
    }
}

#[test]
fn compare_soundness_sign() {
    check_compare_soundness::<SignSet>();
}

#[test]
fn compare_soundness_interval() {
    check_compare_soundness::<Interval>();
}
