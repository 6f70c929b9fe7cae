//! Embedding and task matrices: reads, writes and their text encoding.

use std::fs;

use kembed::{Catalog, InputLayer, Lexicon, Matrix, Rng, TaskKind, TaskMatrix};
use tempfile::TempDir;

fn layer(rows: &[&[f32]]) -> InputLayer {
    let matrix = Matrix::zeros(rows.len(), rows[0].len()).unwrap();
    for (r, values) in rows.iter().enumerate() {
        matrix.set_row(r, values);
    }
    InputLayer::from_matrix(matrix)
}

#[test]
fn matrix_save_load_is_exact() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("layer.input");
    let input = InputLayer::new(5, 7).unwrap();
    input.save(&path).unwrap();
    let loaded = InputLayer::load(&path).unwrap();
    assert_eq!(loaded.rows(), 5);
    assert_eq!(loaded.cols(), 7);
    for r in 0..5 {
        assert_eq!(loaded.row_vec(r), input.row_vec(r));
    }
}

#[test]
fn random_init_is_small_and_deterministic() {
    let a = InputLayer::new(3, 4).unwrap();
    let b = InputLayer::new(3, 4).unwrap();
    for r in 0..3 {
        assert_eq!(a.row_vec(r), b.row_vec(r));
        assert!(a.row_vec(r).iter().all(|x| x.abs() <= 0.25));
    }
}

#[test]
fn matrix_load_checks_shape() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("m");

    fs::write(&path, "2\n3\n1\t2\t3\n4\t5\n").unwrap();
    let Err(err) = Matrix::load(&path) else {
        panic!("expected a column-count error");
    };
    assert!(format!("{err:#}").contains(":4:"), "{err:#}");

    fs::write(&path, "2\n3\n1\t2\t3\n").unwrap();
    assert!(Matrix::load(&path).is_err());

    fs::write(&path, "1\n2\n1\t2\n3\t4\n").unwrap();
    assert!(Matrix::load(&path).is_err());

    fs::write(&path, "1\n2\n1\tx\n").unwrap();
    assert!(Matrix::load(&path).is_err());
}

#[test]
fn averaging_skips_unknown_rows() {
    let input = layer(&[&[1.0, 2.0], &[3.0, 6.0]]);
    let mut out = vec![0.0; 2];
    input.read_averaged(&[0, 1, 99], &mut out);
    assert_eq!(out, [2.0, 4.0]);

    let mut out = vec![0.0; 2];
    input.read_averaged(&[1], &mut out);
    assert_eq!(out, [3.0, 6.0]);

    let mut out = vec![0.0; 2];
    input.read_averaged(&[], &mut out);
    assert_eq!(out, [0.0, 0.0]);
}

#[test]
fn subsampled_average_keeps_everything_when_nothing_is_frequent() {
    let mut lexicon = Lexicon::new(100, 2);
    lexicon.insert("a", 1.0, true, false);
    lexicon.insert("b", 1.0, true, false);
    lexicon.rebuild(-1);
    lexicon.build_discard_table(1.0);

    let input = layer(&[&[1.0, 2.0], &[3.0, 6.0]]);
    let mut out = vec![0.0; 2];
    input.read_averaged_subsampled(&[0, 1], &mut out, &lexicon, 1.0, &mut Rng(7));
    assert_eq!(out, [2.0, 4.0]);
}

#[test]
fn accumulate_all_splits_the_rate() {
    let input = layer(&[&[0.0, 0.0], &[0.0, 0.0]]);
    input.accumulate_all(&[0, 1], &[1.0, -1.0], 0.5);
    assert_eq!(input.row_vec(0), [0.25, -0.25]);
    assert_eq!(input.row_vec(1), [0.25, -0.25]);
}

#[test]
fn nearest_ranks_by_cosine_within_catalog() {
    let mut lexicon = Lexicon::new(100, 2);
    for (w, f) in [("east", 4.0), ("west", 3.0), ("north_east", 2.0), ("south", 1.0)] {
        lexicon.insert(w, f, true, false);
    }
    lexicon.rebuild(-1);
    let input = layer(&[&[1.0, 0.0], &[-1.0, 0.0], &[0.9, 0.1], &[0.0, 1.0]]);

    let mut heap = input.nearest(&[0], &lexicon, Catalog::All);
    let order: Vec<usize> = std::iter::from_fn(|| heap.pop().map(|(_, r)| r)).collect();
    assert_eq!(order, [0, 2, 3, 1]);

    let words: Vec<usize> = input
        .nearest(&[0], &lexicon, Catalog::Words)
        .into_sorted_vec()
        .into_iter()
        .map(|(_, r)| r)
        .collect();
    assert_eq!(words, [1, 3, 0]);

    let phrases = input.nearest(&[0], &lexicon, Catalog::Phrases);
    assert_eq!(phrases.len(), 1);
    assert_eq!(Catalog::from_command("_phrase"), Some(Catalog::Phrases));
    assert_eq!(Catalog::from_command("phrase"), None);
}

#[test]
fn task_matrix_files_are_keyed_by_kind_and_tag() {
    let dir = TempDir::new().unwrap();
    let saved = TaskMatrix::new(TaskKind::Cls, "topic", 3, 4).unwrap();
    saved.matrix().set_row(2, &[1.0, 2.0, 3.0, 4.0]);
    saved.save(dir.path()).unwrap();
    assert!(dir.path().join("layer.output.cls.topic").is_file());

    let mut loaded = TaskMatrix::new(TaskKind::Cls, "topic", 3, 4).unwrap();
    loaded.load(dir.path()).unwrap();
    assert_eq!(loaded.matrix().row_vec(2), [1.0, 2.0, 3.0, 4.0]);

    let mut wrong = TaskMatrix::new(TaskKind::Cls, "topic", 2, 4).unwrap();
    assert!(wrong.load(dir.path()).is_err());
}
