//! Seeded randomized checks of lowered scalar functions.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use relc_core::expr::ScalarExpr;
use relc_core::expr::region::ExprRegion;
use relc_core::lowering::raw::{RawScalar, RawType};
use relc_core::lowering::scalar::compile_region;
use relc_core::translate::sort_comparator;
use relc_core::types::datatype::{DataType, ScalarType};

const ITERATIONS: usize = 500;

fn rng() -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(0x5eed)
}

fn hash_region(types: Vec<DataType>) -> ExprRegion {
    let args = (0..types.len()).map(ScalarExpr::arg).collect();
    ExprRegion::new(types, vec![ScalarExpr::Hash(args)])
}

#[test]
fn hash_ignores_nullability() {
    let plain = compile_region(
        "plain",
        &hash_region(vec![DataType::int64(), DataType::new(ScalarType::Int(32))]),
    )
    .unwrap();
    let nullable = compile_region(
        "nullable",
        &hash_region(vec![
            DataType::nullable(ScalarType::Int(64)),
            DataType::nullable(ScalarType::Int(32)),
        ]),
    )
    .unwrap();

    let mut rng = rng();
    for _ in 0..ITERATIONS {
        let a = rng.random::<i64>() as i128;
        let b = rng.random::<i32>() as i128;

        let expected = plain.call(&[RawScalar::Int(a), RawScalar::Int(b)]).unwrap();
        let got = nullable
            .call(&[
                RawScalar::valid(RawScalar::Int(a)),
                RawScalar::valid(RawScalar::Int(b)),
            ])
            .unwrap();
        assert_eq!(expected, got, "a: {a}, b: {b}");
    }
}

/// Fields are folded with xor, so swapping key values yields the same hash.
/// Lookups must still compare the stored keys.
#[test]
fn swapped_keys_collide() {
    let hash = compile_region(
        "hash",
        &hash_region(vec![DataType::int64(), DataType::int64()]),
    )
    .unwrap();

    let mut rng = rng();
    for _ in 0..ITERATIONS {
        let a = rng.random_range(-1000..1000_i64) as i128;
        let b = rng.random_range(-1000..1000_i64) as i128;
        let ab = hash.call(&[RawScalar::Int(a), RawScalar::Int(b)]).unwrap();
        let ba = hash.call(&[RawScalar::Int(b), RawScalar::Int(a)]).unwrap();
        assert_eq!(ab, ba, "a: {a}, b: {b}");
    }
}

fn round_trip(from: DataType, via: ScalarType) -> ExprRegion {
    ExprRegion::new(
        vec![from],
        vec![ScalarExpr::cast(
            ScalarExpr::cast(ScalarExpr::arg(0), via),
            from.scalar,
        )],
    )
}

#[test]
fn widening_casts_round_trip() {
    let int32 = DataType::nullable(ScalarType::Int(32));
    let targets = [
        ScalarType::Int(64),
        ScalarType::Float(64),
        ScalarType::Decimal {
            precision: 18,
            scale: 2,
        },
    ];

    let mut rng = rng();
    for via in targets {
        let function = compile_region("round_trip", &round_trip(int32, via)).unwrap();
        for _ in 0..ITERATIONS {
            let input = if rng.random_ratio(1, 10) {
                RawScalar::null(&RawType::Int(32))
            } else {
                RawScalar::valid(RawScalar::Int(rng.random::<i32>() as i128))
            };

            let output = function.call(&[input.clone()]).unwrap();
            assert_eq!(1, output.len());
            if input.is_null() {
                assert!(output[0].is_null(), "via {via}");
            } else {
                assert_eq!(input, output[0], "via {via}");
            }
        }
    }
}

#[test]
fn comparator_is_total() {
    let types = [DataType::nullable(ScalarType::Int(64))];
    for desc in [false, true] {
        let cmp = compile_region("cmp", &sort_comparator(&types, &[desc])).unwrap();

        let mut rng = rng();
        let mut value = || {
            if rng.random_ratio(1, 8) {
                RawScalar::null(&RawType::I64)
            } else {
                RawScalar::valid(RawScalar::Int(rng.random_range(-20..20_i64) as i128))
            }
        };

        for _ in 0..ITERATIONS {
            let a = value();
            let b = value();
            let lt = cmp.call_predicate(&[a.clone(), b.clone()]).unwrap();
            let gt = cmp.call_predicate(&[b.clone(), a.clone()]).unwrap();

            // Exactly one of less, greater, equal holds.
            assert!(!(lt && gt), "a: {a}, b: {b}");
            if !lt && !gt {
                assert_eq!(a.is_null(), b.is_null(), "a: {a}, b: {b}");
                if !a.is_null() {
                    assert_eq!(a, b);
                }
            }
            assert!(!cmp.call_predicate(&[a.clone(), a.clone()]).unwrap());
        }
    }
}
