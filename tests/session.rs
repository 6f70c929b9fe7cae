//! End-to-end runs over tiny corpora: vocabulary, updates, inference and
//! model persistence.

use std::fs;

use kembed::{real, Config, LossKind, Session, Worker};
use tempfile::TempDir;

const SMALL: &str = "minlen = 1
minwordfreq = 1
minphrasefreq = 1
maxvocabsize = 10000
maxphrasesize = 10000
negtablesize = 1000
thread = 1
freqsample = 1
dim = 8
";

fn config(dir: &TempDir, corpus: &str, extra: &str) -> Config {
    let train = dir.path().join("train.txt");
    fs::write(&train, corpus).unwrap();
    let mut config = Config::default();
    config
        .apply(&format!("trainfile = {}\n{SMALL}{extra}", train.display()))
        .unwrap();
    config
}

fn session(dir: &TempDir, corpus: &str, extra: &str) -> Session {
    Session::build(config(dir, corpus, extra)).unwrap()
}

fn row(session: &Session, word: &str) -> Vec<real> {
    session.word_vector(word).unwrap()
}

#[test]
fn skipgram_counts_one_loss_per_context_token() {
    let dir = TempDir::new().unwrap();
    let text = "the cat sat on the mat";
    let session = session(
        &dir,
        &format!("skip\t{text}\n"),
        "ngram = 1\nwindowsize = 1\nusecls = false\nusepair = false\n",
    );
    let skip = session.skip_trainer().unwrap();
    let net = session.network();
    let before: Vec<Vec<real>> = ["cat", "sat", "on"].iter().map(|w| row(&session, w)).collect();

    let mut worker = Worker::new(net.dim(), 1);
    skip.update_skip(net, &mut worker, text);
    // Six tokens, radius 1: five left neighbours and five right ones.
    assert_eq!(skip.loss_count(), 10);
    skip.update_skip(net, &mut worker, text);
    assert_eq!(skip.loss_count(), 20);

    for (w, old) in ["cat", "sat", "on"].iter().zip(&before) {
        assert_ne!(&row(&session, w), old, "row of {w:?} did not move");
    }
}

#[test]
fn unknown_text_is_a_no_op() {
    let dir = TempDir::new().unwrap();
    let session = session(
        &dir,
        "skip\tone two three\ncls\tt\t1\tone two\npair\tp\t1\tone\ttwo\n",
        "",
    );
    let net = session.network();
    let mut worker = Worker::new(net.dim(), 1);
    assert!(net.resolve_plain("zzz qqq").is_empty());

    let skip = session.skip_trainer().unwrap();
    skip.update_skip(net, &mut worker, "zzz qqq");
    assert_eq!(skip.loss_count(), 0);

    let cls = session.cls_trainer("t").unwrap();
    cls.update_cls(net, &mut worker, "zzz qqq", 1);
    assert_eq!(cls.loss_count(), 0);

    let pair = session.pair_trainer("p").unwrap();
    pair.update_pair(net, &mut worker, "one", "zzz", 1);
    assert_eq!(pair.loss_count(), 0);

    assert_eq!(session.predict_class("t", "zzz"), None);
    assert!(session.predict_distribution("t", "zzz").is_empty());
    assert_eq!(session.predict_pair("p", "zzz", "one"), None);
}

const CLS_CORPUS: &str = "cls\ttagA\t1\thello world\ncls\ttagA\t0\tgoodbye moon\n";

#[test]
fn classification_trains_and_predicts() {
    let dir = TempDir::new().unwrap();
    let session = session(&dir, &CLS_CORPUS.repeat(20), "epoch = 3\n");
    session.train().unwrap();

    // Lines are lower-cased, tags included.
    let trainer = session.cls_trainer("taga").unwrap();
    assert_eq!(trainer.output().rows(), 2);
    assert!(trainer.loss_count() > 0);

    let label = session.predict_class("taga", "hello world").unwrap();
    assert!(label < 2);

    let dist = session.predict_distribution("taga", "hello world");
    assert_eq!(dist.len(), 2);
    assert_eq!(dist[0].0, label);
    assert!(dist[0].1 >= dist[1].1);
    let total: real = dist.iter().map(|&(_, p)| p).sum();
    assert!((total - 1.0).abs() < 1e-5);
}

#[test]
fn softmax_classification_learns_every_label() {
    let dir = TempDir::new().unwrap();
    let corpus = "cls\tt\t0\tred apple\ncls\tt\t1\tblue sky\ncls\tt\t2\tgreen grass\n";
    let session = session(
        &dir,
        &corpus.repeat(20),
        "cls_t_loss = softmax\nepoch = 20\nlearnrate = 0.2\nuseskipgram = false\nusepair = false\n",
    );
    let trainer = session.cls_trainer("t").unwrap();
    assert_eq!(trainer.params().loss, LossKind::Softmax);
    assert_eq!(trainer.output().rows(), 3);

    session.train().unwrap();
    assert!(trainer.loss_count() > 0);

    for (label, text) in ["red apple", "blue sky", "green grass"].into_iter().enumerate() {
        assert_eq!(session.predict_class("t", text), Some(label), "label of {text:?}");
        let dist = session.predict_distribution("t", text);
        assert_eq!(dist.len(), 3);
        assert_eq!(dist[0].0, label);
        let total: real = dist.iter().map(|&(_, p)| p).sum();
        assert!((total - 1.0).abs() < 1e-5, "{text:?} sums to {total}");
    }
}

#[test]
fn threads_share_the_line_budget() {
    let dir = TempDir::new().unwrap();
    let corpus = "skip\tthe cat sat on the mat\n\
                  cls\tt\t1\tthe cat\n\
                  cls\tt\t0\ton the mat\n\
                  pair\tp\t1\tcat\tmat\n";
    let session = session(&dir, &corpus.repeat(50), "thread = 4\nepoch = 2\n");
    assert_eq!(session.total_lines(), 200);

    session.train().unwrap();
    assert!(session.lines_trained() >= session.total_lines() * 2);
    for trainer in session.trainers() {
        assert!(trainer.loss_count() > 0, "{} {:?} recorded no loss", trainer.kind(), trainer.tag());
    }
}

#[test]
fn pair_updates_each_side_along_the_other() {
    let dir = TempDir::new().unwrap();
    let session = session(
        &dir,
        "pair\tsim\t1\tcat dog\tfish\n",
        "useskipgram = false\nusecls = false\nsubngram = 1\n",
    );
    let net = session.network();
    let trainer = session.pair_trainer("sim").unwrap();

    let (cat, fish) = (row(&session, "cat"), row(&session, "fish"));
    let mut worker = Worker::new(net.dim(), 1);
    trainer.update_pair(net, &mut worker, "cat dog", "fish", 1);
    assert_eq!(trainer.loss_count(), 1);

    let delta = |old: &[real], new: Vec<real>| -> Vec<real> {
        new.iter().zip(old).map(|(n, o)| n - o).collect()
    };
    let d_cat = delta(&cat, row(&session, "cat"));
    let d_fish = delta(&fish, row(&session, "fish"));
    assert!(d_cat.iter().any(|&d| d != 0.0));
    assert!(d_fish.iter().any(|&d| d != 0.0));
    // Each side moves toward the other side's average, so the two updates
    // differ.
    assert_ne!(d_cat, d_fish);

    let ab = session.predict_pair("sim", "cat dog", "fish").unwrap();
    let ba = session.predict_pair("sim", "fish", "cat dog").unwrap();
    assert_eq!(ab, ba);
    assert!(ab > 0.0 && ab < 1.0);
}

#[test]
fn predict_lines() {
    let dir = TempDir::new().unwrap();
    let session = session(
        &dir,
        "cls\tt\t1\thello world\npair\tp\t0\thello\tworld\n",
        "",
    );

    let out = session.predict_line("cls\tt\t9\thello world");
    let fields: Vec<&str> = out.split('\t').collect();
    assert_eq!(fields.len(), 5);
    assert_eq!(fields[..2], ["cls", "t"]);
    assert!(fields[2] == "0" || fields[2] == "1");
    assert_eq!(fields[4], "hello world");

    assert_eq!(
        session.predict_line("cls\tnope\t1\thello world"),
        "cls\tnope\t-1\t0\thello world"
    );
    // Unresolvable text keeps the label it came with.
    assert_eq!(
        session.predict_line("cls\tt\t7\tzzz qqq"),
        "cls\tt\t7\t-1\tzzz qqq"
    );
    assert_eq!(
        session.predict_line("cls\tnope\t3\tzzz"),
        "cls\tnope\t3\t-1\tzzz"
    );
    assert_eq!(
        session.predict_line("pair\tp\t0\thello\tzzz"),
        "pair\tp\t-1\thello\tzzz"
    );
    assert_eq!(session.predict_line("skip\thello"), "skip\thello");

    let mut out = vec![];
    session
        .predict(&b"PAIR\tP\t1\tHello\tWorld\n\n"[..], &mut out)
        .unwrap();
    let out = String::from_utf8(out).unwrap();
    assert_eq!(out.lines().count(), 1);
    assert!(out.starts_with("pair\tp\t"));
    assert!(out.trim_end().ends_with("\thello\tworld"));
}

#[test]
fn sentence_vectors_and_distance() {
    let dir = TempDir::new().unwrap();
    let session = session(&dir, "skip\thello big world\n", "topsize = 1\n");

    let mut out = vec![];
    session
        .sentence_vec(&b"hello world\nzzz\n"[..], &mut out)
        .unwrap();
    let out = String::from_utf8(out).unwrap();
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines.len(), 1);
    let (text, vector) = lines[0].split_once('\t').unwrap();
    assert_eq!(text, "hello world");
    assert_eq!(vector.split(' ').count(), 8);

    let mut out = vec![];
    session
        .distance(&b"hello\n_word\nhello\nzzz\nexit\nworld\n"[..], &mut out)
        .unwrap();
    let out = String::from_utf8(out).unwrap();
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines.len(), 2);
    for line in lines {
        let (text, sim) = line.split_once("\t\t").unwrap();
        assert_ne!(text, "hello");
        let sim: real = sim.parse().unwrap();
        assert!((-1.001..=1.001).contains(&sim));
    }
}

#[test]
fn saved_model_loads_back() {
    let dir = TempDir::new().unwrap();
    let model_dir = dir.path().join("model");
    let session = session(
        &dir,
        &CLS_CORPUS.repeat(5),
        &format!("outputdir = {}\n", model_dir.display()),
    );
    session.train().unwrap();
    assert_eq!(session.save().unwrap(), model_dir);

    let mut config = Config::default();
    config
        .apply(&format!("{SMALL}modeldir = {}\n", model_dir.display()))
        .unwrap();
    let loaded = Session::load(config).unwrap();

    assert_eq!(loaded.tags(), session.tags());
    assert_eq!(
        loaded.network().lexicon.rows(),
        session.network().lexicon.rows()
    );
    for word in ["hello", "world", "goodbye", "moon"] {
        assert_eq!(loaded.word_vector(word), session.word_vector(word));
    }
    assert_eq!(
        loaded.predict_distribution("taga", "hello world"),
        session.predict_distribution("taga", "hello world")
    );
    let skip = |s: &Session| s.skip_trainer().unwrap().output().matrix().row_vec(0);
    assert_eq!(skip(&loaded), skip(&session));
}

#[test]
fn loading_overrides_dim_from_the_saved_matrix() {
    let dir = TempDir::new().unwrap();
    let model_dir = dir.path().join("model");
    let session = session(
        &dir,
        "skip\tone two three\n",
        &format!("outputdir = {}\nusecls = false\nusepair = false\n", model_dir.display()),
    );
    session.save().unwrap();

    let mut config = Config::default();
    config
        .apply(&format!("{SMALL}dim = 16\nmodeldir = {}\n", model_dir.display()))
        .unwrap();
    let loaded = Session::load(config).unwrap();
    assert_eq!(loaded.config().dim, 8);
}
