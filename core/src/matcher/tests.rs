use super::*;
use crate::embed::Embedding;
use crate::index::IndexBuilder;
use crate::testing::TEST_CONFIG;

fn deterministic_vector(seed: usize, len: usize) -> Vec<f32> {
    (0..len)
        .map(|index| {
            let mixed = seed
                .wrapping_mul(1_103_515_245)
                .wrapping_add(index.wrapping_mul(12_345))
                .wrapping_add(97);
            let base = (mixed % 10_000) as f32 / 5_000.0;
            base - 1.0
        })
        .collect()
}

fn embedding(seed: usize) -> Embedding {
    Embedding::new(deterministic_vector(seed, TEST_CONFIG.output_len()))
        .expect("vector must normalize")
}

fn index_of(count: usize) -> SimilarityIndex {
    let mut builder = IndexBuilder::new(TEST_CONFIG);
    for seed in 0..count {
        builder
            .insert(format!("Images/item_{seed:03}.jpg"), embedding(seed))
            .expect("insert must succeed");
    }
    builder.finish()
}

#[test]
fn ranking_is_sorted_ascending() {
    let index = index_of(40);
    let query = embedding(1_000);
    let ranked = rank(query.as_slice(), &index).expect("rank must succeed");

    assert_eq!(ranked.len(), 40);
    for pair in ranked.windows(2) {
        assert!(pair[0].distance <= pair[1].distance);
    }
}

#[test]
fn every_entry_ranks_itself_first() {
    let index = index_of(25);
    for (identifier, values) in index.iter() {
        let top = best(values, &index).expect("best must succeed");
        assert_eq!(top.identifier, identifier);
        assert!(top.distance.abs() < 1e-5, "distance was {}", top.distance);
    }
}

#[test]
fn ties_follow_identifier_order() {
    let mut builder = IndexBuilder::new(TEST_CONFIG);
    let shared = embedding(7);
    for name in ["c.jpg", "a.jpg", "b.jpg"] {
        builder
            .insert(name, shared.clone())
            .expect("insert must succeed");
    }
    let index = builder.finish();

    let ranked = rank(shared.as_slice(), &index).expect("rank must succeed");
    let names: Vec<&str> = ranked
        .iter()
        .map(|entry| entry.identifier.as_str())
        .collect();
    assert_eq!(names, vec!["a.jpg", "b.jpg", "c.jpg"]);
}

#[test]
fn empty_index_ranks_nothing_and_has_no_best() {
    let index = index_of(0);
    let query = embedding(1);
    assert!(rank(query.as_slice(), &index)
        .expect("rank must succeed")
        .is_empty());
    assert_eq!(best(query.as_slice(), &index), Err(MatchError::NoMatches));
}

#[test]
fn mismatched_query_length_is_invalid_input() {
    let index = index_of(3);
    let error = rank(&[1.0, 0.0, 0.0], &index).expect_err("must fail");
    assert_eq!(
        error,
        MatchError::InvalidInput {
            expected: 512,
            got: 3
        }
    );

    let longer = vec![0.01; 513];
    assert!(matches!(
        best(&longer, &index),
        Err(MatchError::InvalidInput { got: 513, .. })
    ));
}

#[test]
fn non_finite_query_is_rejected() {
    let index = index_of(2);
    let mut query = embedding(1).into_vec();
    query[9] = f32::NAN;
    assert_eq!(
        rank(&query, &index),
        Err(MatchError::NonFiniteQuery { index: 9 })
    );
}
