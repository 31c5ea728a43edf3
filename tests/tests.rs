//! Run with `cargo test --all-features`.

use std::collections::{BTreeSet, HashMap};
use std::convert::Infallible;

use memoria::{ToValue, Value, memoize};
use serial_test::serial;

macro_rules! test {
    (miss: $call:expr, $result:expr) => {{
        assert_eq!($call, $result);
        assert!(!memoria::internal::last_was_hit());
    }};
    (hit: $call:expr, $result:expr) => {{
        assert_eq!($call, $result);
        assert!(memoria::internal::last_was_hit());
    }};
}

/// Test basic memoization.
#[test]
#[serial]
fn test_basic() {
    #[memoize]
    fn greeting() -> String {
        "hello ".repeat(2)
    }

    #[memoize]
    fn widen(x: u64) -> u128 {
        u128::from(x) * 2
    }

    #[memoize]
    fn collatz(n: u64) -> u32 {
        match n {
            0 | 1 => 0,
            n if n % 2 == 0 => 1 + collatz(n / 2),
            n => 1 + collatz(3 * n + 1),
        }
    }

    #[memoize]
    fn label(tags: Vec<String>, shout: bool) -> String {
        let text = tags.join(" ");
        if shout { text.to_uppercase() } else { text }
    }

    test!(miss: greeting(), "hello hello ");
    test!(hit: greeting(), "hello hello ");

    // Neighbors beyond double precision stay apart.
    test!(miss: widen(9_007_199_254_740_992), 18_014_398_509_481_984);
    test!(miss: widen(9_007_199_254_740_993), 18_014_398_509_481_986);
    test!(hit: widen(9_007_199_254_740_992), 18_014_398_509_481_984);

    test!(miss: collatz(6), 8);
    test!(hit: collatz(3), 7);
    test!(miss: collatz(12), 9);
    test!(hit: collatz(5), 5);

    let tags = |tags: &[&str]| tags.iter().map(|tag| tag.to_string()).collect::<Vec<_>>();
    test!(miss: label(tags(&["new", "hot"]), false), "new hot");
    test!(miss: label(tags(&["hot", "new"]), false), "hot new");
    test!(miss: label(tags(&["new", "hot"]), true), "NEW HOT");
    test!(hit: label(tags(&["new", "hot"]), false), "new hot");
}

/// Test that a `None` result is never cached.
#[test]
#[serial]
fn test_option_results() {
    #[memoize]
    fn find(haystack: &str, needle: char) -> Option<usize> {
        haystack.find(needle)
    }

    test!(miss: find("hello", 'l'), Some(2));
    test!(hit: find("hello", 'l'), Some(2));
    test!(miss: find("hello", 'z'), None);
    test!(miss: find("hello", 'z'), None);
    test!(miss: find("world", 'l'), Some(3));
}

/// Test the calc language.
#[test]
#[serial]
fn test_calc() {
    #[memoize]
    fn evaluate(script: &str, files: Files) -> i32 {
        script
            .split('+')
            .map(str::trim)
            .map(|part| match part.strip_prefix("eval ") {
                Some(path) => evaluate(&files.read(path), files.clone()),
                None => part.parse::<i32>().unwrap(),
            })
            .sum()
    }

    let mut files = Files::default();
    files.write("alpha.calc", "2 + eval beta.calc");
    files.write("beta.calc", "2 + 3");
    files.write("gamma.calc", "8 + 3");
    test!(miss: evaluate("eval alpha.calc", files.clone()), 7);
    test!(miss: evaluate("eval beta.calc", files.clone()), 5);
    test!(hit: evaluate("eval alpha.calc", files.clone()), 7);

    // Any change to the file system is a different argument.
    files.write("gamma.calc", "42");
    test!(miss: evaluate("eval alpha.calc", files.clone()), 7);
    files.write("beta.calc", "4 + eval gamma.calc");
    test!(miss: evaluate("eval beta.calc", files.clone()), 46);
    test!(miss: evaluate("eval alpha.calc", files.clone()), 48);
    test!(hit: evaluate("eval alpha.calc", files), 48);
}

#[derive(Default, Clone)]
struct Files(HashMap<String, String>);

impl Files {
    fn read(&self, path: &str) -> String {
        self.0.get(path).cloned().unwrap_or_default()
    }

    fn write(&mut self, path: &str, text: &str) {
        self.0.insert(path.into(), text.into());
    }
}

impl ToValue for Files {
    fn to_value(&self) -> Value {
        self.0.to_value()
    }
}

/// Test that unordered arguments are compared by content.
#[test]
#[serial]
fn test_unordered_arguments() {
    #[memoize]
    fn total(weights: HashMap<String, u32>, picks: BTreeSet<String>) -> u32 {
        picks.iter().filter_map(|pick| weights.get(pick)).sum()
    }

    let mut forward = HashMap::new();
    forward.insert("a".to_owned(), 1);
    forward.insert("b".to_owned(), 2);
    forward.insert("c".to_owned(), 3);

    let mut backward = HashMap::new();
    backward.insert("c".to_owned(), 3);
    backward.insert("b".to_owned(), 2);
    backward.insert("a".to_owned(), 1);

    let picks: BTreeSet<String> = ["a".to_owned(), "c".to_owned()].into();
    test!(miss: total(forward, picks.clone()), 4);
    test!(hit: total(backward.clone(), picks), 4);
    test!(miss: total(backward, BTreeSet::new()), 0);
}

/// Test that async calls leave the hit flag of the current thread alone.
#[test]
#[serial]
fn test_async_calls_keep_hit_flag() {
    #[memoize]
    fn square(x: u32) -> u32 {
        x * x
    }

    let echo = memoria::memoize_async(|(x,): (u32,)| async move { Ok::<_, Infallible>(Some(x)) });

    test!(miss: square(3), 9);
    test!(hit: square(3), 9);
    let pending = echo.call((1,));
    assert!(memoria::internal::last_was_hit());
    assert_eq!(futures::executor::block_on(pending), Ok(Some(1)));
    assert!(memoria::internal::last_was_hit());

    // Attaching to a pending call is not a hit.
    test!(miss: square(4), 16);
    let first = echo.call((2,));
    let second = echo.call((2,));
    assert!(!memoria::internal::last_was_hit());
    let both = futures::executor::block_on(futures::future::join(first, second));
    assert_eq!(both, (Ok(Some(2)), Ok(Some(2))));
}
