//! End-to-end scenarios against the public surface of `memoria_core`,
//! exercising the store and persona layers the way a caller would.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use memoria_core::{
    DistanceMetric, HnswParams, IndexedVectorStore, InMemoryMetadataStore, MemoryRecord,
    MemoryType, PersonaId, SearchFilters, SearchOptions, VectorId,
};

fn record(id: VectorId, persona_id: PersonaId) -> MemoryRecord {
    MemoryRecord {
        id,
        persona_id,
        memory_type: MemoryType::Fact,
        importance: 0.5,
        timestamp_ms: 0,
        original_content: "content".into(),
        conversation_id: None,
        speaker: None,
        tags: Vec::new(),
        context: None,
        last_accessed_ms: 0,
        access_count: 0,
    }
}

fn new_store(dimensions: usize, capacity: usize) -> IndexedVectorStore {
    IndexedVectorStore::new(
        capacity * dimensions * 4,
        dimensions,
        DistanceMetric::Cosine,
        HnswParams::default(),
        Arc::new(InMemoryMetadataStore::new()),
    )
}

fn random_unit_vector(rng: &mut StdRng, dimensions: usize) -> Vec<f32> {
    let mut v: Vec<f32> = (0..dimensions).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let norm = v.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt() as f32;
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

/// Scenario 1 from the design brief: three hand-placed vectors, exact
/// similarities expected back.
#[test]
fn scenario_one_hand_placed_vectors_rank_by_cosine_similarity() {
    const D: usize = 1536;
    let store = new_store(D, 8);
    let persona = PersonaId::new();

    let mut first = vec![0.0; D];
    first[0] = 1.0;
    let mut second = vec![0.0; D];
    second[1] = 1.0;
    let mut third = vec![0.0; D];
    third[0] = 1.0 / std::f32::consts::SQRT_2;
    third[1] = 1.0 / std::f32::consts::SQRT_2;

    let id_first = VectorId::new();
    let id_second = VectorId::new();
    let id_third = VectorId::new();
    store.add_vector(id_first, &first, record(id_first, persona)).unwrap();
    store.add_vector(id_second, &second, record(id_second, persona)).unwrap();
    store.add_vector(id_third, &third, record(id_third, persona)).unwrap();

    let mut query = vec![0.0; D];
    query[0] = 1.0;

    let hits = store.search(
        &query,
        &SearchOptions {
            limit: 2,
            threshold: 0.0,
            ..Default::default()
        },
    );

    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].id, id_first);
    assert!((hits[0].similarity - 1.0).abs() < 1e-5);
    assert_eq!(hits[1].id, id_third);
    assert!((hits[1].similarity - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-4);
}

/// Scenario 2: a large random corpus, deleting the first chunk of ids, then
/// confirming the survivor still finds itself first and no deleted id leaks
/// into the results.
#[test]
fn scenario_two_deleted_ids_never_resurface_in_a_large_corpus() {
    const D: usize = 64;
    const N: usize = 5000;
    let store = new_store(D, N);
    let persona = PersonaId::new();
    let mut rng = StdRng::seed_from_u64(7);

    let mut ids = Vec::with_capacity(N);
    let mut vectors = Vec::with_capacity(N);
    for _ in 0..N {
        let id = VectorId::new();
        let vector = random_unit_vector(&mut rng, D);
        store.add_vector(id, &vector, record(id, persona)).unwrap();
        ids.push(id);
        vectors.push(vector);
    }

    for id in &ids[0..1000] {
        store.delete_vector(*id).unwrap();
    }

    let query = vectors[1500].clone();
    let hits = store.search(
        &query,
        &SearchOptions {
            limit: 10,
            ..Default::default()
        },
    );

    assert!(!hits.is_empty());
    assert_eq!(hits[0].id, ids[1500]);
    assert!((hits[0].similarity - 1.0).abs() < 1e-4);

    let deleted: std::collections::HashSet<_> = ids[0..1000].iter().collect();
    assert!(hits.iter().all(|hit| !deleted.contains(&hit.id)));
}

/// Scenario 6: a high threshold against an orthogonal corpus yields an
/// empty result, not an error.
#[test]
fn scenario_six_high_threshold_against_orthogonal_corpus_is_empty() {
    const D: usize = 32;
    let store = new_store(D, 100);
    let persona = PersonaId::new();

    for i in 1..D {
        let mut v = vec![0.0; D];
        v[i] = 1.0;
        let id = VectorId::new();
        store.add_vector(id, &v, record(id, persona)).unwrap();
    }

    let mut query = vec![0.0; D];
    query[0] = 1.0;

    let hits = store.search(
        &query,
        &SearchOptions {
            limit: 5,
            threshold: 0.9,
            ..Default::default()
        },
    );
    assert!(hits.is_empty());
}

/// Persona filtering holds across a mixed-ownership corpus: a persona-scoped
/// search never returns another persona's memories.
#[test]
fn persona_scoped_search_never_crosses_personas() {
    const D: usize = 16;
    let store = new_store(D, 64);
    let persona_a = PersonaId::new();
    let persona_b = PersonaId::new();
    let mut rng = StdRng::seed_from_u64(42);

    for _ in 0..20 {
        let id = VectorId::new();
        let vector = random_unit_vector(&mut rng, D);
        store.add_vector(id, &vector, record(id, persona_a)).unwrap();
    }
    for _ in 0..20 {
        let id = VectorId::new();
        let vector = random_unit_vector(&mut rng, D);
        store.add_vector(id, &vector, record(id, persona_b)).unwrap();
    }

    let query = random_unit_vector(&mut rng, D);
    let hits = store.search(
        &query,
        &SearchOptions {
            limit: 40,
            filters: SearchFilters {
                persona_id: Some(persona_a),
                ..Default::default()
            },
            ..Default::default()
        },
    );

    assert_eq!(hits.len(), 20);
    for hit in &hits {
        let record = hit.metadata.as_ref().unwrap();
        assert_eq!(record.persona_id, persona_a);
    }
}

/// Spec §8's HNSW accuracy property: for a 10k-vector, D=1536 corpus and
/// k=10, efSearch>=50 must yield recall@10 >= 0.9 against the exact top-10.
/// Ignored by default (building 10k * 1536 f32 vectors and two full search
/// passes is multiple seconds of work); run explicitly with
/// `cargo test --release -- --ignored recall`.
#[test]
#[ignore]
fn hnsw_recall_at_10_meets_spec_threshold_on_10k_corpus() {
    const D: usize = 1536;
    const N: usize = 10_000;
    const K: usize = 10;

    let mut params = HnswParams::new(16, 200, 50);
    params.index_threshold = 0; // force the graph search path, never the exhaustive fallback
    let store = IndexedVectorStore::new(
        N * D * 4,
        D,
        DistanceMetric::Cosine,
        params,
        Arc::new(InMemoryMetadataStore::new()),
    );
    let persona = PersonaId::new();
    let mut rng = StdRng::seed_from_u64(1234);

    let mut ids = Vec::with_capacity(N);
    let mut vectors = Vec::with_capacity(N);
    for _ in 0..N {
        let id = VectorId::new();
        let vector = random_unit_vector(&mut rng, D);
        store.add_vector(id, &vector, record(id, persona)).unwrap();
        ids.push(id);
        vectors.push(vector);
    }

    const QUERIES: usize = 20;
    let mut total_overlap = 0usize;
    for _ in 0..QUERIES {
        let query = random_unit_vector(&mut rng, D);

        let approx = store.search(
            &query,
            &SearchOptions {
                limit: K,
                ef: Some(50),
                ..Default::default()
            },
        );
        let approx_ids: std::collections::HashSet<_> = approx.iter().map(|h| h.id).collect();

        // Exact top-k via a brute-force cosine scan over unit vectors
        // (cosine reduces to dot product when both sides are unit-norm).
        let mut exact: Vec<(VectorId, f32)> = ids
            .iter()
            .zip(vectors.iter())
            .map(|(&id, v)| {
                let sim: f32 = v.iter().zip(query.iter()).map(|(a, b)| a * b).sum();
                (id, sim)
            })
            .collect();
        exact.sort_by(|a, b| b.1.total_cmp(&a.1));
        exact.truncate(K);
        let exact_ids: std::collections::HashSet<_> = exact.iter().map(|(id, _)| *id).collect();

        total_overlap += approx_ids.intersection(&exact_ids).count();
    }

    let recall = total_overlap as f64 / (QUERIES * K) as f64;
    assert!(recall >= 0.9, "recall@10 was {recall}, expected >= 0.9");
}
