//! Round-trip property tests for the statement splitter.

use pretty_assertions::assert_eq;
use prism::splitter::split_statements;

/// Splices statement spans back into the gaps between them.
fn rejoin(input: &str) -> String {
    let statements = split_statements(input);
    let mut rebuilt = String::new();
    let mut cursor = 0;
    for statement in &statements {
        rebuilt.push_str(&input[cursor..statement.start_offset]);
        rebuilt.push_str(&statement.text);
        cursor = statement.end_offset;
    }
    rebuilt.push_str(&input[cursor..]);
    rebuilt
}

#[test]
fn test_round_trip_reproduces_input_exactly() {
    let inputs = [
        "",
        "select 1",
        "select 1;",
        "select 1; select 2",
        "select 1;\n\nselect 2;\n",
        "  leading and trailing   ;   whitespace  ",
        "select 'semi;colon' as s; select \"quoted;ident\";",
        "select 'it''s' || ';';\nselect 2",
        "-- comment only\n",
        "/* block ; comment */",
        "select 1 -- eol comment ;\n; select 2",
        "select /* nested /* block ; */ comment */ 1;",
        "insert into t values (1); update t set x = 2 where y = ';';",
        "select 'höheres; Leben' from übung;",
    ];

    for input in inputs {
        assert_eq!(rejoin(input), input, "round trip failed for {input:?}");
    }
}

#[test]
fn test_statement_counts() {
    let cases: [(&str, usize); 8] = [
        ("", 0),
        ("   \n ", 0),
        ("-- nope", 0),
        (";;;", 0),
        ("select 1", 1),
        ("select 1;", 1),
        ("select 1; select 2", 2),
        ("select 1; select 2; select 3;", 3),
    ];

    for (input, expected) in cases {
        assert_eq!(
            split_statements(input).len(),
            expected,
            "wrong count for {input:?}"
        );
    }
}

#[test]
fn test_statements_are_never_blank() {
    let inputs = ["a;;b", " ;x; ", "select 1;\n\n;select 2"];
    for input in inputs {
        for statement in split_statements(input) {
            assert!(
                !statement.text.trim().is_empty(),
                "blank statement from {input:?}"
            );
        }
    }
}

#[test]
fn test_offsets_index_the_original_buffer() {
    let input = "select 'höhe';\n  select 2  ";
    for statement in split_statements(input) {
        assert_eq!(&input[statement.start_offset..statement.end_offset], statement.text);
    }
}
