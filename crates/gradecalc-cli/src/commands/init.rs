//! The `gradecalc init` command.

use std::path::Path;

use anyhow::Result;

pub fn execute() -> Result<()> {
    if Path::new("gradecalc.toml").exists() {
        println!("gradecalc.toml already exists, skipping.");
    } else {
        std::fs::write("gradecalc.toml", SAMPLE_CONFIG)?;
        println!("Created gradecalc.toml");
    }

    std::fs::create_dir_all("ledgers")?;
    let example_path = Path::new("ledgers/example.toml");
    if example_path.exists() {
        println!("ledgers/example.toml already exists, skipping.");
    } else {
        std::fs::write(example_path, EXAMPLE_LEDGER)?;
        println!("Created ledgers/example.toml");
    }

    println!("\nNext steps:");
    println!("  1. Run: gradecalc validate --ledger ledgers/example.toml");
    println!("  2. Run: gradecalc load --ledger ledgers/example.toml --state state.json");
    println!("  3. Run: gradecalc recalc --state state.json");
    println!("  4. Run: gradecalc scores --state state.json --ledger example");

    Ok(())
}

const SAMPLE_CONFIG: &str = r##"# gradecalc configuration

# decimal places kept on calculated values
precision = 2

# delay between passes for `gradecalc recalc --repeat`
poll_delay_ms = 1000

# leave matched clicker scores alone when forcing recalculation
skip_matched_responses = true

calc_indicator = "#"
no_score_indicator = "NS"
"##;

const EXAMPLE_LEDGER: &str = r#"[ledger]
slug = "example"
name = "Example Course"

[[categories]]
slug = "quiz"
name = "Quizzes"

[[categories]]
slug = "summary"
name = "Summary"

[[people]]
key = "sam"
name = "Sam Student"
student_number = "0001"

[[tasks]]
slug = "quiz1"
category = "quiz"
full_marks = 10

[[tasks]]
slug = "quiz2"
category = "quiz"
full_marks = 10

[[tasks]]
slug = "total"
category = "summary"
full_marks = 100
formula = { type = "sum", args = { src_category = "quiz" } }

[[scores]]
task = "quiz1"
person = "sam"
value = 7

[[scores]]
task = "quiz2"
person = "sam"
value = 9
"#;
