//! Forsyth's linear-speed vertex cache optimisation.
//!
//! Triangles are emitted greedily: each step picks the unprocessed face whose
//! vertices score highest, where a vertex scores for sitting near the front of
//! a simulated LRU cache and for having few faces left to draw.

use std::sync::OnceLock;

const CACHE_DECAY_POWER: f32 = 1.5;
const LAST_TRI_SCORE: f32 = 0.75;
const VALENCE_BOOST_SCALE: f32 = 2.0;
const VALENCE_BOOST_POWER: f32 = 0.5;

pub const MAX_VERTEX_CACHE_SIZE: usize = 64;
const MAX_PRECOMPUTED_VALENCE_SCORES: usize = 64;
const EVICTED: u32 = u32::MAX;

fn compute_cache_score(cache_position: usize, cache_size: usize) -> f32 {
    if cache_position < 3 {
        // Every vertex of the last triangle scores the same, so winding does
        // not change the result.
        LAST_TRI_SCORE
    } else {
        let scaler = 1.0 / (cache_size - 3) as f32;
        let score = 1.0 - (cache_position - 3) as f32 * scaler;
        score.powf(CACHE_DECAY_POWER)
    }
}

fn compute_valence_score(active_faces: u32) -> f32 {
    VALENCE_BOOST_SCALE * (active_faces as f32).powf(-VALENCE_BOOST_POWER)
}

struct ScoreTables {
    cache: Vec<[f32; MAX_VERTEX_CACHE_SIZE]>,
    valence: [f32; MAX_PRECOMPUTED_VALENCE_SCORES],
}

fn score_tables() -> &'static ScoreTables {
    static TABLES: OnceLock<ScoreTables> = OnceLock::new();
    TABLES.get_or_init(|| {
        let mut cache = vec![[0.0; MAX_VERTEX_CACHE_SIZE]; MAX_VERTEX_CACHE_SIZE + 1];
        for (cache_size, row) in cache.iter_mut().enumerate() {
            for (position, score) in row.iter_mut().enumerate().take(cache_size) {
                *score = compute_cache_score(position, cache_size);
            }
        }

        let mut valence = [0.0; MAX_PRECOMPUTED_VALENCE_SCORES];
        for (faces, score) in valence.iter_mut().enumerate() {
            *score = compute_valence_score(faces as u32);
        }

        ScoreTables { cache, valence }
    })
}

fn find_vertex_score(active_faces: u32, cache_position: u32, cache_size: u32) -> f32 {
    if active_faces == 0 {
        return -1.0;
    }

    let tables = score_tables();
    let mut score = 0.0;
    if cache_position < cache_size {
        score += tables.cache[cache_size as usize][cache_position as usize];
    }

    if (active_faces as usize) < MAX_PRECOMPUTED_VALENCE_SCORES {
        score += tables.valence[active_faces as usize];
    } else {
        score += compute_valence_score(active_faces);
    }
    score
}

#[derive(Clone, Copy)]
struct VertexData {
    score: f32,
    active_face_start: u32,
    active_face_count: u32,
    cache_pos0: u32,
    cache_pos1: u32,
}

impl Default for VertexData {
    fn default() -> Self {
        Self {
            score: 0.0,
            active_face_start: 0,
            active_face_count: 0,
            cache_pos0: EVICTED,
            cache_pos1: EVICTED,
        }
    }
}

/// Reorders a triangle list for post-transform cache reuse.
///
/// `lru_cache_size` is the simulated cache size and is capped at
/// [`MAX_VERTEX_CACHE_SIZE`]. The output holds exactly the input triangles,
/// each with its original winding.
pub fn optimize_faces(indices: &[u32], lru_cache_size: u32) -> Vec<u32> {
    let index_count = indices.len() - indices.len() % 3;
    if index_count == 0 {
        return indices.to_vec();
    }
    let cache_size = lru_cache_size.min(MAX_VERTEX_CACHE_SIZE as u32);

    let vertex_count = indices[..index_count]
        .iter()
        .copied()
        .max()
        .map_or(0, |max| max as usize + 1);
    let mut vertices = vec![VertexData::default(); vertex_count];

    for &index in &indices[..index_count] {
        vertices[index as usize].active_face_count += 1;
    }

    let mut list_position = 0;
    for vertex in vertices.iter_mut() {
        vertex.active_face_start = list_position;
        list_position += vertex.active_face_count;
        vertex.score = find_vertex_score(vertex.active_face_count, vertex.cache_pos0, cache_size);
        vertex.active_face_count = 0;
    }

    // Faces are identified by the position of their first index.
    let mut active_faces = vec![0u32; list_position as usize];
    for face in (0..index_count).step_by(3) {
        for &index in &indices[face..face + 3] {
            let vertex = &mut vertices[index as usize];
            active_faces[(vertex.active_face_start + vertex.active_face_count) as usize] = face as u32;
            vertex.active_face_count += 1;
        }
    }

    let mut processed = vec![false; index_count];
    let mut output = vec![0u32; index_count];

    let mut cache0 = [0u32; MAX_VERTEX_CACHE_SIZE + 3];
    let mut cache1 = [0u32; MAX_VERTEX_CACHE_SIZE + 3];
    let mut entries_in_cache0 = 0usize;

    let mut best_face = 0usize;
    let mut best_score = -1.0f32;
    let max_valence_score = find_vertex_score(1, EVICTED, cache_size) * 3.0;

    for out_face in (0..index_count).step_by(3) {
        if best_score < 0.0 {
            // Nothing in the cache touches a remaining face, so look everywhere.
            for face in (0..index_count).step_by(3) {
                if processed[face] {
                    continue;
                }
                let face_score: f32 = indices[face..face + 3]
                    .iter()
                    .map(|&index| vertices[index as usize].score)
                    .sum();
                if face_score > best_score {
                    best_score = face_score;
                    best_face = face;
                    if best_score >= max_valence_score {
                        break;
                    }
                }
            }
        }

        processed[best_face] = true;
        let mut entries_in_cache1 = 0usize;

        for corner in 0..3 {
            let index = indices[best_face + corner];
            output[out_face + corner] = index;

            let vertex = &mut vertices[index as usize];
            if vertex.cache_pos1 as usize >= entries_in_cache1 {
                vertex.cache_pos1 = entries_in_cache1 as u32;
                cache1[entries_in_cache1] = index;
                entries_in_cache1 += 1;

                if vertex.active_face_count == 1 {
                    vertex.active_face_count -= 1;
                    continue;
                }
            }

            let start = vertex.active_face_start as usize;
            let end = start + vertex.active_face_count as usize;
            if let Some(found) = active_faces[start..end]
                .iter()
                .position(|&face| face as usize == best_face)
            {
                active_faces.swap(start + found, end - 1);
            }
            vertex.active_face_count -= 1;
            vertex.score = find_vertex_score(vertex.active_face_count, vertex.cache_pos1, cache_size);
        }

        // Shift the previous cache contents behind the new triangle.
        for &index in &cache0[..entries_in_cache0] {
            let vertex = &mut vertices[index as usize];
            if vertex.cache_pos1 as usize >= entries_in_cache1 {
                vertex.cache_pos1 = entries_in_cache1 as u32;
                cache1[entries_in_cache1] = index;
                entries_in_cache1 += 1;
                vertex.score =
                    find_vertex_score(vertex.active_face_count, vertex.cache_pos1, cache_size);
            }
        }

        // Best face among everything still cached, including up to three
        // vertices that were just pushed out.
        best_score = -1.0;
        for &index in &cache1[..entries_in_cache1] {
            let (start, end) = {
                let vertex = &mut vertices[index as usize];
                vertex.cache_pos0 = vertex.cache_pos1;
                vertex.cache_pos1 = EVICTED;
                let start = vertex.active_face_start as usize;
                (start, start + vertex.active_face_count as usize)
            };

            for &face in &active_faces[start..end] {
                let face = face as usize;
                let face_score: f32 = indices[face..face + 3]
                    .iter()
                    .map(|&corner| vertices[corner as usize].score)
                    .sum();
                if face_score > best_score {
                    best_score = face_score;
                    best_face = face;
                }
            }
        }

        std::mem::swap(&mut cache0, &mut cache1);
        entries_in_cache0 = entries_in_cache1.min(cache_size as usize);
    }

    output.extend_from_slice(&indices[index_count..]);
    output
}

/// Misses of a simulated LRU post-transform cache over a triangle list.
pub fn count_cache_misses(indices: &[u32], cache_size: usize) -> usize {
    let mut cache: Vec<u32> = Vec::with_capacity(cache_size + 1);
    let mut misses = 0;
    for &index in indices {
        match cache.iter().position(|&cached| cached == index) {
            Some(position) => {
                cache.remove(position);
            }
            None => misses += 1,
        }
        cache.insert(0, index);
        cache.truncate(cache_size);
    }
    misses
}
