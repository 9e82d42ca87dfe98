use threadrelay::slack::chunk;

#[test]
fn test_short_text_is_a_single_unchanged_chunk() {
    assert_eq!(chunk("Hello", 4000), vec!["Hello".to_string()]);
    assert_eq!(chunk("", 10), vec![String::new()]);
    assert_eq!(chunk("   \n  ", 2), vec!["   \n  ".to_string()]);
}

#[test]
fn test_lines_are_packed_greedily_and_rejoin_losslessly() {
    let text = (0..20)
        .map(|i| format!("line {i:02}"))
        .collect::<Vec<_>>()
        .join("\n");
    let chunks = chunk(&text, 20);

    assert!(chunks.len() > 1);
    assert!(chunks.iter().all(|c| c.len() <= 20), "{chunks:?}");
    // "line 00\nline 01" is 15 bytes; a third line would not fit
    assert_eq!(chunks[0], "line 00\nline 01");
    assert_eq!(chunks.join("\n"), text);
}

#[test]
fn test_single_line_splits_on_spaces() {
    let text = "the quick brown fox jumps over the lazy dog";
    let chunks = chunk(text, 12);

    assert!(chunks.iter().all(|c| c.len() <= 12), "{chunks:?}");
    assert_eq!(chunks.join(" "), text);
}

#[test]
fn test_text_without_whitespace_splits_on_code_points() {
    let text = "你好世界".repeat(50);
    let chunks = chunk(&text, 100);

    assert!(chunks.len() > 1);
    for c in &chunks {
        assert!(c.len() <= 100);
        assert_eq!(c.len() % 3, 0, "chunk cut inside a code point: {c:?}");
    }
    assert_eq!(chunks.concat(), text);
}

#[test]
fn test_oversized_word_is_kept_whole() {
    let word = "x".repeat(30);
    let text = format!("{word} tail");
    let chunks = chunk(&text, 10);

    assert_eq!(chunks, vec![word, "tail".to_string()]);
}

#[test]
fn test_code_fences_are_balanced_in_every_chunk() {
    let mut text = String::from("Here is the code:\n```python\n");
    for i in 0..40 {
        text.push_str(&format!("print({i})\n"));
    }
    text.push_str("```\nThat is all.");

    let chunks = chunk(&text, 120);
    assert!(chunks.len() > 2);
    for c in &chunks {
        assert!(c.len() <= 120, "chunk over limit: {} bytes", c.len());
        assert_eq!(c.matches("```").count() % 2, 0, "unbalanced fence in {c:?}");
    }
    assert!(chunks[1].starts_with("```python\n"));
    assert!(chunks.last().is_some_and(|c| c.ends_with("That is all.")));
}

#[test]
fn test_chunking_is_deterministic() {
    let text = "alpha beta gamma\n".repeat(30);
    assert_eq!(chunk(&text, 64), chunk(&text, 64));
}

#[test]
fn test_unbroken_ascii_is_split_without_markers() {
    let text = "a".repeat(150);
    assert_eq!(chunk(&text, 100), vec!["a".repeat(100), "a".repeat(50)]);
}

#[test]
fn test_multibyte_text_respects_byte_budget() {
    let chunks = chunk(&"你好世界".repeat(100), 500);
    assert!(chunks.len() > 1);
    assert!(chunks.iter().all(|c| c.len() <= 500));
}

#[test]
fn test_words_are_never_split() {
    let text = "lorem ipsum dolor sit amet consectetur adipiscing elit\n".repeat(12);
    let chunks = chunk(&text, 70);

    let original: Vec<&str> = text.split_whitespace().collect();
    let rejoined: Vec<&str> = chunks.iter().flat_map(|c| c.split_whitespace()).collect();
    assert_eq!(rejoined, original);
}

#[test]
fn test_fenced_lines_fill_chunks_up_to_the_cap() {
    let text = format!("```\n{}\n{}\n```", "a".repeat(28), "b".repeat(28));
    let chunks = chunk(&text, 36);

    assert_eq!(
        chunks,
        vec![
            format!("```\n{}\n```", "a".repeat(28)),
            format!("```\n{}\n```", "b".repeat(28)),
        ]
    );
}

#[test]
fn test_no_chunk_is_an_empty_code_block() {
    let text = format!("```\n{}\n{}\n```", "a".repeat(28), "b".repeat(28));
    let chunks = chunk(&text, 30);

    assert_eq!(chunks.len(), 2);
    for c in &chunks {
        assert_ne!(c.as_str(), "```\n```");
        assert_eq!(c.matches("```").count(), 2);
    }
}

#[test]
fn test_fence_opening_line_moves_with_its_code() {
    let text = "intro words\n```rust\nlet x = 1;\n```";
    let chunks = chunk(text, 27);

    assert_eq!(chunks, vec!["intro words", "```rust\nlet x = 1;\n```"]);
}

#[test]
fn test_blank_line_inside_code_keeps_the_fence_open() {
    let text = format!("```\n{}\n\n{}\n```", "a".repeat(10), "b".repeat(10));
    let chunks = chunk(&text, 20);

    assert_eq!(
        chunks,
        vec![
            format!("```\n{}\n```", "a".repeat(10)),
            format!("```\n{}\n```", "b".repeat(10)),
        ]
    );
}

#[test]
fn test_line_moves_whole_when_it_fits_a_chunk_of_its_own() {
    let chunks = chunk("aaaa\nbbbbbbbbbb cccccccccc", 20);
    assert_eq!(chunks, vec!["aaaa", "bbbbbbbbbb", "cccccccccc"]);
}

#[test]
fn test_growing_text_never_rewrites_finished_chunks() {
    let text = "Here is a summary of the change.\n\
                It touches several files and adds tests.\n\
                ```rust\n\
                fn main() {\n    println!(\"hello world\");\n}\n\
                ```\n\
                That covers the whole fix for the issue we saw in the deploy logs.";

    for max_bytes in [24, 40, 64] {
        let mut previous: Vec<String> = Vec::new();
        for (end, _) in text.char_indices().skip(1) {
            let current = chunk(&text[..end], max_bytes);
            assert!(current.len() >= previous.len(), "chunk count shrank at {end}");
            let finished = previous.len().saturating_sub(1);
            assert_eq!(
                current[..finished],
                previous[..finished],
                "finished chunk changed at {end} (max {max_bytes})"
            );
            for c in &current {
                assert_eq!(c.matches("```").count() % 2, 0, "unbalanced fence in {c:?}");
            }
            previous = current;
        }
    }
}
