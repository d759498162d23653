// Integration tests for rh: compile expressions, evaluate them, and walk real trees

use proptest::prelude::*;
use rh::*;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

fn eval(expr: &str) -> Result<Value, VmError> {
    let predicate = Predicate::compile(expr).expect("compile");
    let mut candidate = Candidate::new("file", FileStat::synthetic(S_IFREG | 0o644, 0), 0);
    predicate.evaluate(&mut predicate.new_vm(), &mut candidate)
}

fn eval_with(expr: &str, candidate: &mut Candidate) -> Value {
    let predicate = Predicate::compile(expr).expect("compile");
    predicate.evaluate(&mut predicate.new_vm(), candidate).expect("evaluate")
}

fn lit(x: Value) -> String {
    if x < 0 {
        format!("-{}", x.unsigned_abs())
    } else {
        x.to_string()
    }
}

/// Runs `expr` over `root` and returns the visited paths relative to it.
fn find(expr: &str, root: &Path, options: SearchOptions) -> (Vec<String>, Summary) {
    let predicate = Predicate::compile(expr).expect("compile");
    let mut found = Vec::new();
    let mut visitor = |c: &Candidate| -> io::Result<()> {
        let rel = c.as_path().strip_prefix(root).expect("under root");
        found.push(rel.to_string_lossy().into_owned());
        Ok(())
    };
    let summary = Search::new(&predicate, options).on_error(|_| {}).run([root], &mut visitor).expect("search");
    found.sort();
    (found, summary)
}

fn write(path: PathBuf, bytes: usize) {
    fs::write(path, vec![b'x'; bytes]).unwrap();
}

/// root/{a.txt, b.rs, sub/{c.txt, .hidden.txt, deeper/d.txt}}
fn sample_tree() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    fs::create_dir_all(root.join("sub/deeper")).unwrap();
    write(root.join("a.txt"), 3);
    write(root.join("b.rs"), 10);
    write(root.join("sub/c.txt"), 1);
    write(root.join("sub/.hidden.txt"), 1);
    write(root.join("sub/deeper/d.txt"), 2);
    dir
}

#[test]
fn test_glob_scenario() {
    let dir = sample_tree();
    let (found, summary) = find(r#""*.txt""#, dir.path(), SearchOptions::default());
    assert_eq!(found, vec!["a.txt", "sub/c.txt", "sub/deeper/d.txt"]);
    assert_eq!(summary.evaluated, 8);
    assert!(summary.success());
}

#[test]
fn test_directory_mode_scenario() {
    let dir = sample_tree();
    let (found, _) = find("(mode & 0170000) == 0040000", dir.path(), SearchOptions::default());
    assert_eq!(found, vec!["", "sub", "sub/deeper"]);
    let (same, _) = find("type == IFDIR", dir.path(), SearchOptions::default());
    assert_eq!(found, same);
}

#[test]
fn test_prune_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    fs::create_dir_all(root.join("sub")).unwrap();
    write(root.join("sub/x"), 1);
    write(root.join("sub/y"), 1);
    write(root.join("f"), 1);
    let (found, summary) = find("depth >= 1 && prune", root, SearchOptions::default());
    assert!(found.is_empty());
    // root, sub and f are evaluated; nothing below sub is reached
    assert_eq!(summary.evaluated, 3);
}

#[test]
fn test_prune_does_not_leak_to_siblings() {
    let dir = sample_tree();
    let (found, _) = find(r#""sub" ? prune : 1"#, dir.path(), SearchOptions::default());
    assert_eq!(found, vec!["", "a.txt", "b.rs"]);
}

#[test]
fn test_traversal_is_complete() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    for i in 0..5 {
        for j in 0..4 {
            let sub = root.join(format!("d{}/e{}", i, j));
            fs::create_dir_all(&sub).unwrap();
            for k in 0..3 {
                write(sub.join(format!("f{}", k)), k);
            }
        }
    }

    fn expected(dir: &Path, root: &Path, out: &mut Vec<String>) {
        out.push(dir.strip_prefix(root).unwrap().to_string_lossy().into_owned());
        for entry in fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                expected(&path, root, out);
            } else {
                out.push(path.strip_prefix(root).unwrap().to_string_lossy().into_owned());
            }
        }
    }
    let mut want = Vec::new();
    expected(root, root, &mut want);
    want.sort();

    let (found, summary) = find("1", root, SearchOptions::default());
    let unique: HashSet<&String> = found.iter().collect();
    assert_eq!(unique.len(), found.len());
    assert_eq!(found, want);
    assert_eq!(summary.visited, 1 + 5 + 20 + 60);
}

#[test]
fn test_depth_bounds() {
    let dir = sample_tree();
    let options = SearchOptions::builder().min_depth(2).build();
    let (found, summary) = find("1", dir.path(), options);
    assert_eq!(found, vec!["sub/.hidden.txt", "sub/c.txt", "sub/deeper", "sub/deeper/d.txt"]);
    assert_eq!(summary.evaluated, 8);

    let options = SearchOptions::builder().max_depth(1).build();
    let (found, summary) = find("1", dir.path(), options);
    assert_eq!(found, vec!["", "a.txt", "b.rs", "sub"]);
    assert_eq!(summary.evaluated, 4);
}

#[test]
fn test_prune_works_above_min_depth() {
    let dir = sample_tree();
    let options = SearchOptions::builder().min_depth(2).build();
    let (found, _) = find(r#"depth == 1 && "sub" ? prune : 1"#, dir.path(), options);
    assert!(found.is_empty());
}

#[test]
fn test_cycle_is_reported_once() {
    let dir = sample_tree();
    let root = dir.path();
    symlink("..", root.join("sub/loop")).unwrap();

    let predicate = Predicate::compile("1").unwrap();
    let notices = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&notices);
    let mut visited = 0;
    let mut visitor = |_: &Candidate| -> io::Result<()> {
        visited += 1;
        Ok(())
    };
    let options = SearchOptions::builder().follow(FollowMode::Always).build();
    let summary = Search::new(&predicate, options)
        .on_error(move |err| sink.lock().unwrap().push(err.is_failure()))
        .run([root], &mut visitor)
        .unwrap();
    assert_eq!(summary.notices, 1);
    assert_eq!(*notices.lock().unwrap(), vec![false]);
    assert!(summary.success());
    // every real entry plus the link itself
    assert_eq!(visited, 9);

    let (found, summary) = find("1", root, SearchOptions::default());
    assert_eq!(summary.notices, 0);
    assert!(found.contains(&"sub/loop".to_string()));
}

#[test]
fn test_follow_arguments_only() {
    let dir = sample_tree();
    let link = dir.path().join("to-sub");
    symlink(dir.path().join("sub"), &link).unwrap();
    symlink(dir.path().join("a.txt"), dir.path().join("sub/back")).unwrap();

    let options = SearchOptions::builder().follow(FollowMode::Args).build();
    let (found, _) = find("type == IFLNK", &link, options);
    // the argument itself is followed, links below it are not
    assert_eq!(found, vec!["back"]);
}

#[test]
fn test_link_target_patterns() {
    let dir = sample_tree();
    symlink("a.txt", dir.path().join("ln")).unwrap();
    let (found, _) = find(r#""a.*".link"#, dir.path(), SearchOptions::default());
    assert_eq!(found, vec!["ln"]);
}

#[test]
fn test_reference_files() {
    let dir = sample_tree();
    let reference = dir.path().join("a.txt");
    let expr = format!(r#"type == IFREG && "{}".size < size && "{}".exists"#, reference.display(), reference.display());
    let (found, _) = find(&expr, dir.path(), SearchOptions::default());
    assert_eq!(found, vec!["b.rs"]);

    let missing = format!(r#""{}".exists"#, dir.path().join("nope").display());
    assert_eq!(eval(&missing), Ok(0));
}

#[test]
fn test_exit_ends_search() {
    let dir = sample_tree();
    let (found, summary) = find(r#""*.txt" && exit"#, dir.path(), SearchOptions::default());
    assert_eq!(found.len(), 1);
    assert!(summary.exited);
}

#[test]
fn test_short_circuit() {
    let mut candidate = Candidate::default();
    assert_eq!(eval_with("0 && prune", &mut candidate), 0);
    assert!(!candidate.pruned());
    assert_eq!(eval_with("1 || prune", &mut candidate), 1);
    assert!(!candidate.pruned());
    assert_eq!(eval_with("0 && exit", &mut candidate), 0);
    assert_eq!(eval_with("1 || exit", &mut candidate), 1);
    assert!(!candidate.exited());
    assert_eq!(eval_with("1 && prune", &mut candidate), 1);
    assert!(candidate.pruned());
    assert_eq!(eval_with("5 && 7", &mut Candidate::default()), 1);
    assert_eq!(eval_with("0 || 9", &mut Candidate::default()), 1);

    // nothing is pruned during the walk either
    let dir = sample_tree();
    let (found, _) = find("1 || prune", dir.path(), SearchOptions::default());
    assert_eq!(found.len(), 8);
}

#[test]
fn test_ternary_side_effects() {
    let mut candidate = Candidate::default();
    assert_eq!(eval_with("1 ? 5 : prune", &mut candidate), 5);
    assert!(!candidate.pruned());
    assert_eq!(eval_with("0 ? prune : 7", &mut candidate), 7);
    assert!(!candidate.pruned());
    assert_eq!(eval_with("0 ? 1 : 0 ? 2 : 3", &mut candidate), 3);
}

#[test]
fn test_nested_calls() {
    let predicate = Predicate::compile("add(a, b) { a + b } twice(x) { add(x, x) } twice(add(1, 2)) + 1").unwrap();
    let mut vm = predicate.new_vm();
    let mut candidate = Candidate::default();
    assert_eq!(predicate.evaluate(&mut vm, &mut candidate), Ok(7));
    assert_eq!(vm.stack(), &[7]);
    assert!(vm.frames().is_empty());
    assert_eq!(vm.fp(), 0);

    assert_eq!(eval("fact(n) { return n <= 1 ? 1 : n * fact(n - 1); } fact(10)"), Ok(3_628_800));
}

#[test]
fn test_runaway_recursion_is_an_error() {
    assert_eq!(eval("f(n) { f(n + 1) } f(0)"), Err(VmError::StackOverflow));
    let predicate = Predicate::compile("1 / (size - size)").unwrap();
    let dir = sample_tree();
    let mut visitor = |_: &Candidate| -> io::Result<()> { Ok(()) };
    let result = Search::new(&predicate, SearchOptions::default()).run([dir.path()], &mut visitor);
    assert!(matches!(result, Err(RhError::Runtime(VmError::DivideByZero))));
}

#[test]
fn test_arity_mismatch_names_both_counts() {
    match Predicate::compile("f(a) { a } f(1, 2)") {
        Err(RhError::Compile(err)) => assert_eq!(err.message, "function f expects 1 argument, got 2"),
        other => panic!("unexpected {:?}", other.map(|p| p.start_pc())),
    }
}

#[test]
fn test_compile_error_location() {
    let mut engine = Engine::new();
    let err = engine.compile(Source::new("rules", "size > 1 &&\n  (mode & 0170000 ==")).unwrap_err();
    assert_eq!(err.source_name, "rules");
    assert_eq!(err.line, 2);
    assert!(err.message.starts_with("expected expression"));
    assert!(err.to_string().starts_with("rules: line 2, byte"));
}

#[test]
fn test_scaled_numbers_and_time_units() {
    let mut big = Candidate::new("big", FileStat::synthetic(S_IFREG, 3 * 1024 * 1024), 0);
    assert_eq!(eval_with("size > 2M && size < 4M", &mut big), 1);
    assert_eq!(eval("2 * days == 172800"), Ok(1));
    assert_eq!(eval("now >= today && now - today < 1 * day + 1 * hour"), Ok(1));
}

#[test]
fn test_deep_ternary_chains_never_abort() {
    // the else chain fits in a large program and evaluates without recursion
    let limits = Limits { program_size: 1_000_000, ..Limits::default() };
    let mut engine = Engine::with_limits(limits);
    engine.compile_str("chain", &format!("{}size", "size == 1 ? 1 : ".repeat(60_000))).unwrap();
    let predicate = engine.finish().unwrap();
    let mut candidate = Candidate::new("f", FileStat::synthetic(S_IFREG, 7), 0);
    assert_eq!(predicate.evaluate(&mut predicate.new_vm(), &mut candidate), Ok(7));

    // with the default limits a long chain is an ordinary compile error
    let mut engine = Engine::new();
    let err = engine.compile_str("chain", &format!("{}0", "1 ? 1 : ".repeat(5000))).unwrap_err();
    assert!(err.message.starts_with("program too big"));
    assert!(engine.compile_str("chain", &format!("{}0", "1 ? 1 : ".repeat(2400))).is_ok());

    let then_chain = format!("{}0{}", "1 ? ".repeat(5000), " : 0".repeat(5000));
    let err = Engine::new().compile_str("chain", &then_chain).unwrap_err();
    assert_eq!(err.message, "expression nested too deeply");
}

#[test]
fn test_full_width_literals() {
    assert_eq!(eval("-9223372036854775808 < 0 && -9223372036854775808 - 1 == 9223372036854775807"), Ok(1));
    assert_eq!(eval("0xffffffffffffffff"), Ok(-1));
    assert_eq!(eval("(mode & 0xfffffffffffff000) == IFREG"), Ok(1));
    assert!(Predicate::compile("9223372036854775808").is_err());
}

#[test]
fn test_uppercase_now() {
    assert_eq!(eval("NOW == now && mtime < NOW"), Ok(1));
}

proptest! {
    #[test]
    fn binary_operators_match_wrapping_reference(
        a in -1_000_000_000_000i64..1_000_000_000_000,
        b in -1_000_000_000_000i64..1_000_000_000_000,
    ) {
        let cases: [(&str, fn(i64, i64) -> Result<i64, VmError>); 18] = [
            ("+", |a, b| Ok(a.wrapping_add(b))),
            ("-", |a, b| Ok(a.wrapping_sub(b))),
            ("*", |a, b| Ok(a.wrapping_mul(b))),
            ("/", |a, b| if b == 0 { Err(VmError::DivideByZero) } else { Ok(a.wrapping_div(b)) }),
            ("%", |a, b| if b == 0 { Err(VmError::ModuloByZero) } else { Ok(a.wrapping_rem(b)) }),
            ("<<", |a, b| Ok(a.wrapping_shl(b as u32))),
            (">>", |a, b| Ok(a.wrapping_shr(b as u32))),
            ("&", |a, b| Ok(a & b)),
            ("|", |a, b| Ok(a | b)),
            ("^", |a, b| Ok(a ^ b)),
            ("==", |a, b| Ok((a == b) as i64)),
            ("!=", |a, b| Ok((a != b) as i64)),
            ("<", |a, b| Ok((a < b) as i64)),
            ("<=", |a, b| Ok((a <= b) as i64)),
            (">", |a, b| Ok((a > b) as i64)),
            (">=", |a, b| Ok((a >= b) as i64)),
            ("&&", |a, b| Ok((a != 0 && b != 0) as i64)),
            ("||", |a, b| Ok((a != 0 || b != 0) as i64)),
        ];
        for (op, reference) in cases {
            let expr = format!("({}) {} ({})", lit(a), op, lit(b));
            prop_assert_eq!(eval(&expr), reference(a, b), "{}", expr);
        }
    }

    #[test]
    fn unary_operators_match_reference(a in -1_000_000_000_000i64..1_000_000_000_000) {
        prop_assert_eq!(eval(&format!("!({})", lit(a))), Ok((a == 0) as i64));
        prop_assert_eq!(eval(&format!("~({})", lit(a))), Ok(!a));
        prop_assert_eq!(eval(&format!("-({})", lit(a))), Ok(a.wrapping_neg()));
    }

    #[test]
    fn ternary_picks_one_branch(c in any::<bool>(), a in 0i64..1000, b in 0i64..1000) {
        let expr = format!("{} ? {} : {}", c as i64, a, b);
        prop_assert_eq!(eval(&expr), Ok(if c { a } else { b }));
    }

    #[test]
    fn compiler_does_not_panic_on_random_input(s in ".{0,64}") {
        let mut engine = Engine::new();
        let _ = engine.compile_str("fuzz", &s);
    }

    #[test]
    fn compiler_does_not_panic_on_expression_soup(
        tokens in proptest::collection::vec(
            prop::sample::select(vec![
                "(", ")", "{", "}", "[", "]", "?", ":", ",", ";", "&&", "||", "!", "-", "+", "*", "/",
                "size", "depth", "prune", "f", "x", "return", "0", "017", "0x1f", "10K", "\"*.c\"",
                "\"/\".size", "\"\".mtime", "2024", "/",
            ]),
            0..24,
        )
    ) {
        let mut engine = Engine::new();
        let _ = engine.compile_str("soup", &tokens.join(" "));
    }
}
