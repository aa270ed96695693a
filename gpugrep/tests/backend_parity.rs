//! Cross-backend determinism suite.
//!
//! Every scenario runs once per backend override. A forced GPU override
//! falls back to the CPU engine when no device is present, so on machines
//! without a GPU the extra legs degrade to re-running the CPU path; on
//! machines with one they pin the kernels to the same answers.

use gpugrep::{BackendOverride, DispatchTuning, SearchOptions, SearchOutput, Searcher};

fn backends() -> Vec<(&'static str, BackendOverride)> {
    let mut backends = vec![("cpu", BackendOverride::Cpu), ("vulkan", BackendOverride::Vulkan)];
    if cfg!(target_os = "macos") {
        backends.push(("metal", BackendOverride::Metal));
    }
    backends
}

fn run(text: &[u8], pattern: &[u8], options: SearchOptions, backend: BackendOverride) -> SearchOutput {
    let searcher = Searcher::with_config(options, DispatchTuning::default(), backend);
    searcher.search(text, pattern).unwrap()
}

fn pairs(out: &SearchOutput) -> Vec<(u32, u32)> {
    let mut pairs: Vec<(u32, u32)> = out
        .records
        .iter()
        .map(|r| (r.position, r.match_len))
        .collect();
    pairs.sort();
    pairs
}

fn assert_all_backends(
    text: &[u8],
    pattern: &[u8],
    options: SearchOptions,
    expected: &[(u32, u32)],
) {
    for (name, backend) in backends() {
        let out = run(text, pattern, options, backend);
        assert_eq!(
            pairs(&out),
            expected.to_vec(),
            "backend {name} disagrees for pattern {:?}",
            String::from_utf8_lossy(pattern)
        );
        assert_eq!(
            out.total_matches,
            expected.len() as u64,
            "backend {name} total_matches"
        );
    }
}

#[test]
fn scenario_two_literal_matches_same_line() {
    let text = b"hello world hello";
    assert_all_backends(text, b"hello", SearchOptions::default(), &[(0, 5), (12, 5)]);
    let out = run(text, b"hello", SearchOptions::default(), BackendOverride::Cpu);
    assert!(out.records.iter().all(|r| r.line_start == 0 && r.line_num == 1));
}

#[test]
fn scenario_case_insensitive_literal() {
    let options = SearchOptions {
        case_insensitive: true,
        ..Default::default()
    };
    assert_all_backends(
        b"Hello HELLO hello HeLLo",
        b"hello",
        options,
        &[(0, 5), (6, 5), (12, 5), (18, 5)],
    );
}

#[test]
fn scenario_word_boundary_literal() {
    let options = SearchOptions {
        word_boundary: true,
        ..Default::default()
    };
    assert_all_backends(b"the theory there", b"the", options, &[(0, 3)]);
}

#[test]
fn scenario_invert_match() {
    let text = b"line with pattern\nline without\nanother with pattern";
    let options = SearchOptions {
        invert_match: true,
        ..Default::default()
    };
    for (name, backend) in backends() {
        let out = run(text, b"pattern", options, backend);
        assert_eq!(out.total_matches, 1, "backend {name}");
        let r = out.records[0];
        assert_eq!(
            &text[r.position as usize..(r.position + r.match_len) as usize],
            b"line without",
            "backend {name}"
        );
        assert_eq!(r.line_num, 2, "backend {name}");
    }
}

#[test]
fn scenario_ere_plus() {
    let options = SearchOptions {
        extended: true,
        ..Default::default()
    };
    assert_all_backends(
        b"ac abc abbc abbbc",
        b"ab+c",
        options,
        &[(3, 3), (7, 4), (12, 5)],
    );
}

#[test]
fn scenario_ere_alternation() {
    let options = SearchOptions {
        extended: true,
        ..Default::default()
    };
    assert_all_backends(
        b"cat dog bird cat",
        b"cat|dog",
        options,
        &[(0, 3), (4, 3), (13, 3)],
    );
}

#[test]
fn empty_pattern_counts_every_line() {
    let text = b"one\ntwo\nthree";
    for (name, backend) in backends() {
        let out = run(text, b"", SearchOptions::default(), backend);
        assert_eq!(out.total_matches, 3, "backend {name}");
        assert!(out.records.iter().all(|r| r.match_len == 0));
    }
    // trailing newline does not create a phantom line
    let out = run(b"one\ntwo\n", b"", SearchOptions::default(), BackendOverride::Cpu);
    assert_eq!(out.total_matches, 2);
}

#[test]
fn invert_partitions_the_line_set() {
    let text = b"alpha\nbeta\ngamma\ndelta\nalpha beta";
    for pattern in [&b"alpha"[..], b"a", b"zzz"] {
        let normal = run(text, pattern, SearchOptions::default(), BackendOverride::Cpu);
        let inverted = run(
            text,
            pattern,
            SearchOptions {
                invert_match: true,
                ..Default::default()
            },
            BackendOverride::Cpu,
        );

        let mut matched: Vec<u32> = normal.records.iter().map(|r| r.line_start).collect();
        matched.dedup();
        let inverted_lines: Vec<u32> = inverted.records.iter().map(|r| r.line_start).collect();

        let mut union: Vec<u32> = matched.iter().chain(&inverted_lines).copied().collect();
        union.sort();
        assert_eq!(union, vec![0, 6, 11, 17, 23]);
        // and the two sets are disjoint
        assert!(matched.iter().all(|l| !inverted_lines.contains(l)));
    }
}

#[test]
fn word_boundary_never_touches_word_bytes() {
    let text = b"scan rescan scanner scan_x scan";
    let options = SearchOptions {
        word_boundary: true,
        ..Default::default()
    };
    for (name, backend) in backends() {
        let out = run(text, b"scan", options, backend);
        for r in &out.records {
            let start = r.position as usize;
            let end = start + r.match_len as usize;
            assert!(
                start == 0 || !text[start - 1].is_ascii_alphanumeric() && text[start - 1] != b'_',
                "backend {name}: left neighbor is a word byte"
            );
            assert!(
                end == text.len() || !text[end].is_ascii_alphanumeric() && text[end] != b'_',
                "backend {name}: right neighbor is a word byte"
            );
        }
        assert_eq!(out.total_matches, 2, "backend {name}");
    }
}

#[test]
fn sorted_output_invariant() {
    let text = b"x y x\ny x y\nx x x\n".repeat(10);
    for (name, backend) in backends() {
        let out = run(&text, b"x", SearchOptions::default(), backend);
        let mut prev = (0u32, 0u32);
        for r in &out.records {
            assert!(
                (r.line_start, r.position) >= prev,
                "backend {name}: output not sorted"
            );
            prev = (r.line_start, r.position);
        }
    }
}

#[test]
fn boundary_pattern_equals_text() {
    assert_all_backends(b"exact", b"exact", SearchOptions::default(), &[(0, 5)]);
}

#[test]
fn boundary_pattern_longer_than_text() {
    assert_all_backends(b"ab", b"abc", SearchOptions::default(), &[]);
}

#[test]
fn boundary_match_at_end_without_newline() {
    let text = b"first line\nlast token";
    for (name, backend) in backends() {
        let out = run(text, b"token", SearchOptions::default(), backend);
        assert_eq!(out.total_matches, 1, "backend {name}");
        assert_eq!(out.records[0].line_start, 11, "backend {name}");
        assert_eq!(out.records[0].line_num, 2, "backend {name}");
    }
}

#[test]
fn regex_and_fixed_string_agree_on_meta_free_pattern() {
    let text = b"grape apple grape\napple";
    let fixed = run(
        text,
        b"apple",
        SearchOptions {
            fixed_string: true,
            ..Default::default()
        },
        BackendOverride::Cpu,
    );
    let regex = run(
        text,
        b"apple",
        SearchOptions {
            extended: true,
            ..Default::default()
        },
        BackendOverride::Cpu,
    );
    assert_eq!(pairs(&fixed), pairs(&regex));
}

#[test]
fn regex_anchors_per_line() {
    let text = b"log: ok\nerror: bad\nlog: error";
    let options = SearchOptions {
        extended: true,
        ..Default::default()
    };
    for (name, backend) in backends() {
        let out = run(text, b"^error", options, backend);
        assert_eq!(out.total_matches, 1, "backend {name}");
        assert_eq!(out.records[0].position, 8, "backend {name}");
    }
}

#[test]
fn regex_classes_and_intervals() {
    let options = SearchOptions {
        extended: true,
        ..Default::default()
    };
    assert_all_backends(
        b"a1 b22 c333 d4444",
        b"[0-9]{2,3}",
        options,
        &[(4, 2), (8, 3), (13, 3)],
    );
}

#[test]
fn regex_invert_matches_line_records() {
    let text = b"one pattern here\nnothing\np.ttern literal dot";
    let options = SearchOptions {
        extended: true,
        invert_match: true,
        ..Default::default()
    };
    for (name, backend) in backends() {
        let out = run(text, b"p.ttern", options, backend);
        // the regex matches lines 1 and 3, so only "nothing" is inverted
        assert_eq!(out.total_matches, 1, "backend {name}");
        assert_eq!(out.records[0].position, 17, "backend {name}");
        assert_eq!(out.records[0].match_len, 7, "backend {name}");
        assert_eq!(out.records[0].line_num, 2, "backend {name}");
    }
}

#[test]
fn regex_case_insensitive_literals() {
    let options = SearchOptions {
        extended: true,
        case_insensitive: true,
        ..Default::default()
    };
    assert_all_backends(
        b"Stop STOP stop\nstOp",
        b"stop!?",
        options,
        &[(0, 4), (5, 4), (10, 4), (15, 4)],
    );
}

#[test]
fn multi_pattern_union_by_line() {
    let text = b"cat here\nnothing\ndog there\ncat dog";
    let searcher = Searcher::with_config(
        SearchOptions::default(),
        DispatchTuning::default(),
        BackendOverride::Cpu,
    );
    let out = searcher.search_all(text, &[b"cat", b"dog"]).unwrap();
    let lines: Vec<u32> = out.records.iter().map(|r| r.line_num).collect();
    assert_eq!(lines, vec![1, 3, 4]);
    // one record per line even though the last line matches both patterns
    assert_eq!(out.total_matches, 3);
}
