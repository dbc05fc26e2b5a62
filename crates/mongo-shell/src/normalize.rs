use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

static OBJECT_ID_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"ObjectId\(([^)]*)\)").expect("failed to compile ObjectId regex")
});

static ISO_DATE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"ISODate\((.+?)\)").expect("failed to compile ISODate regex")
});

static TIMESTAMP_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Timestamp\((.+?)\)").expect("failed to compile Timestamp regex")
});

static NUMBER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"Number(?:Long|Int)\("?(-?\d+)"?\)"#).expect("failed to compile number regex")
});

/// Rewrites the shell specific wrappers printed by `printjson` so the remainder is plain JSON.
///
/// - `ObjectId(x)` becomes `x`
/// - `ISODate(x)` becomes `x`
/// - `Timestamp(a, b)` becomes `[a, b]`
/// - `NumberLong(n)` and `NumberInt(n)` become `n`
///
/// Output that is empty, `null` or `undefined` becomes `{}`.
pub fn normalize(output: &str) -> String {
    let trimmed = output.trim();
    if matches!(trimmed, "" | "null" | "undefined") {
        return "{}".to_owned();
    }

    let output = OBJECT_ID_REGEX.replace_all(trimmed, "$1");
    let output = ISO_DATE_REGEX.replace_all(&output, "$1");
    let output = TIMESTAMP_REGEX.replace_all(&output, "[$1]");
    let output = NUMBER_REGEX.replace_all(&output, "$1");

    output.into_owned()
}

/// Normalizes and parses the output of a `printjson` call.
pub fn parse_output(output: &str) -> Result<Value, serde_json::Error> {
    serde_json::from_str(&normalize(output))
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    #[rstest]
    #[case(r#"{ "_id" : ObjectId(abc123), "user" : "alice" }"#, r#"{ "_id" : abc123, "user" : "alice" }"#)]
    #[case(r#"{ "_id" : ObjectId("5f1d"), "n" : 1 }"#, r#"{ "_id" : "5f1d", "n" : 1 }"#)]
    #[case(r#"{ "ts" : Timestamp(100, 1) }"#, r#"{ "ts" : [100, 1] }"#)]
    #[case(r#"{ "date" : ISODate("2014-01-01T00:00:00Z") }"#, r#"{ "date" : "2014-01-01T00:00:00Z" }"#)]
    #[case(r#"{ "t" : NumberLong(3), "v" : NumberLong("-7") }"#, r#"{ "t" : 3, "v" : -7 }"#)]
    #[case("null\n", "{}")]
    #[case("undefined\n", "{}")]
    #[case("", "{}")]
    fn normalizes_shell_wrappers(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize(input), expected);
    }

    #[test]
    fn parses_replica_set_status() {
        let output = indoc! {r#"
            {
                "set" : "rs0",
                "date" : ISODate("2014-03-10T17:39:01Z"),
                "myState" : 1,
                "members" : [
                    {
                        "_id" : 0,
                        "name" : "db1:27017",
                        "optime" : Timestamp(1394473097, 1),
                        "electionId" : ObjectId("7fffffff0000000000000001"),
                        "term" : NumberLong(1)
                    }
                ],
                "ok" : 1
            }
        "#};

        let status = parse_output(output).expect("normalized status must be valid JSON");

        assert_eq!(status["set"], json!("rs0"));
        assert_eq!(status["date"], json!("2014-03-10T17:39:01Z"));
        assert_eq!(status["members"][0]["optime"], json!([1_394_473_097, 1]));
        assert_eq!(status["members"][0]["electionId"], json!("7fffffff0000000000000001"));
        assert_eq!(status["members"][0]["term"], json!(1));
    }

    #[test]
    fn null_parses_to_empty_object() {
        assert_eq!(parse_output("null\n").expect("valid JSON"), json!({}));
    }

    #[test]
    fn malformed_output_is_an_error() {
        assert!(parse_output("2014-03-10T17:39:01.123+0000 warning: something").is_err());
    }
}
