//! TOML ledger definitions.
//!
//! A ledger file declares one ledger with its categories, people, tasks,
//! entered scores and external responses. Files are parsed into a
//! [`LedgerDef`], checked with [`validate_ledger`], and loaded into a
//! [`Store`] with [`load_ledger`].

use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, info};

use crate::model::{DependencyKind, FormulaId, FormulaKind, LedgerId, Person, PersonId};
use crate::registry::FormulaRegistry;
use crate::staleness;
use crate::store::{NewTask, Store};
use crate::value::Value;

/// Intermediate TOML structure for parsing ledger files.
#[derive(Debug, Deserialize)]
struct TomlLedgerFile {
    ledger: TomlLedgerHeader,
    #[serde(default)]
    categories: Vec<TomlCategory>,
    #[serde(default)]
    people: Vec<TomlPerson>,
    #[serde(default)]
    tasks: Vec<TomlTask>,
    #[serde(default)]
    scores: Vec<TomlScore>,
    #[serde(default)]
    responses: Vec<TomlResponse>,
}

#[derive(Debug, Deserialize)]
struct TomlLedgerHeader {
    slug: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TomlCategory {
    slug: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TomlPerson {
    key: String,
    name: String,
    #[serde(default)]
    student_number: Option<String>,
    #[serde(default)]
    device_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TomlTask {
    slug: String,
    #[serde(default)]
    name: Option<String>,
    category: String,
    #[serde(default)]
    full_marks: Option<TomlScalar>,
    #[serde(default)]
    formula: Option<TomlFormula>,
}

#[derive(Debug, Deserialize)]
struct TomlFormula {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    args: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct TomlScore {
    task: String,
    person: String,
    #[serde(default)]
    value: Option<TomlScalar>,
    #[serde(default)]
    full_marks: Option<TomlScalar>,
    #[serde(default)]
    formula: Option<TomlFormula>,
}

#[derive(Debug, Deserialize)]
struct TomlResponse {
    task: String,
    owner: String,
    score: TomlScalar,
    #[serde(default)]
    description: String,
}

/// Numbers may be written bare or quoted; anything else stays text.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TomlScalar {
    Number(f64),
    Text(String),
}

impl From<TomlScalar> for Value {
    fn from(scalar: TomlScalar) -> Self {
        match scalar {
            TomlScalar::Number(n) => Value::from(n),
            TomlScalar::Text(text) => Value::from(text),
        }
    }
}

impl From<TomlFormula> for FormulaDef {
    fn from(formula: TomlFormula) -> Self {
        FormulaDef {
            kind: formula.kind,
            args: formula.args,
        }
    }
}

/// A parsed ledger file.
#[derive(Debug, Clone)]
pub struct LedgerDef {
    pub slug: String,
    pub name: String,
    pub categories: Vec<CategoryDef>,
    pub people: Vec<PersonDef>,
    pub tasks: Vec<TaskDef>,
    pub scores: Vec<ScoreDef>,
    pub responses: Vec<ResponseDef>,
}

#[derive(Debug, Clone)]
pub struct CategoryDef {
    pub slug: String,
    pub name: String,
}

/// A person, referenced elsewhere in the file by `key`.
#[derive(Debug, Clone)]
pub struct PersonDef {
    pub key: String,
    pub name: String,
    pub student_number: Option<String>,
    pub device_ids: Vec<String>,
}

/// A formula as written. The type tag stays a string so that validation
/// can report unknown tags instead of failing the parse.
#[derive(Debug, Clone)]
pub struct FormulaDef {
    pub kind: String,
    pub args: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct TaskDef {
    pub slug: String,
    pub name: String,
    pub category: String,
    pub full_marks: Value,
    pub formula: Option<FormulaDef>,
}

/// Entered data for one (task, person) score.
#[derive(Debug, Clone)]
pub struct ScoreDef {
    pub task: String,
    pub person: String,
    pub value: Option<Value>,
    pub full_marks: Option<Value>,
    pub formula: Option<FormulaDef>,
}

#[derive(Debug, Clone)]
pub struct ResponseDef {
    pub task: String,
    pub owner: String,
    pub score: Value,
    pub description: String,
}

/// Parse a single TOML file into a `LedgerDef`.
pub fn parse_ledger(path: &Path) -> Result<LedgerDef> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read ledger file: {}", path.display()))?;

    parse_ledger_str(&content, path)
}

/// Parse a TOML string into a `LedgerDef`.
pub fn parse_ledger_str(content: &str, source_path: &Path) -> Result<LedgerDef> {
    let parsed: TomlLedgerFile = toml::from_str(content)
        .with_context(|| format!("failed to parse TOML: {}", source_path.display()))?;

    let slug = parsed.ledger.slug.trim().to_string();
    if slug.is_empty() {
        anyhow::bail!("ledger slug is empty in {}", source_path.display());
    }

    let categories = parsed
        .categories
        .into_iter()
        .map(|c| CategoryDef {
            name: c.name.unwrap_or_else(|| c.slug.clone()),
            slug: c.slug,
        })
        .collect();

    let people = parsed
        .people
        .into_iter()
        .map(|p| PersonDef {
            key: p.key,
            name: p.name,
            student_number: p.student_number.filter(|s| !s.trim().is_empty()),
            device_ids: p.device_ids,
        })
        .collect();

    let tasks = parsed
        .tasks
        .into_iter()
        .map(|t| TaskDef {
            name: t.name.unwrap_or_else(|| t.slug.clone()),
            slug: t.slug,
            category: t.category,
            full_marks: t.full_marks.map(Value::from).unwrap_or_default(),
            formula: t.formula.map(FormulaDef::from),
        })
        .collect();

    let scores = parsed
        .scores
        .into_iter()
        .map(|s| ScoreDef {
            task: s.task,
            person: s.person,
            value: s.value.map(Value::from),
            full_marks: s.full_marks.map(Value::from),
            formula: s.formula.map(FormulaDef::from),
        })
        .collect();

    let responses = parsed
        .responses
        .into_iter()
        .map(|r| ResponseDef {
            task: r.task,
            owner: r.owner,
            score: Value::from(r.score),
            description: r.description,
        })
        .collect();

    Ok(LedgerDef {
        name: parsed.ledger.name.unwrap_or_else(|| slug.clone()),
        slug,
        categories,
        people,
        tasks,
        scores,
        responses,
    })
}

/// Load every `.toml` ledger file under a directory, recursively.
pub fn load_ledger_directory(dir: &Path) -> Result<Vec<LedgerDef>> {
    let mut ledgers = Vec::new();

    if !dir.is_dir() {
        anyhow::bail!("not a directory: {}", dir.display());
    }

    let mut entries: Vec<_> = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory: {}", dir.display()))?
        .collect::<std::io::Result<_>>()?;
    entries.sort_by_key(|e| e.path());

    for entry in entries {
        let path = entry.path();
        if path.is_dir() {
            ledgers.extend(load_ledger_directory(&path)?);
        } else if path.extension().is_some_and(|ext| ext == "toml") {
            match parse_ledger(&path) {
                Ok(ledger) => ledgers.push(ledger),
                Err(e) => {
                    tracing::warn!("skipping {}: {:#}", path.display(), e);
                }
            }
        }
    }

    Ok(ledgers)
}

/// Parse a file, or every ledger file under a directory.
pub fn parse_ledger_path(path: &Path) -> Result<Vec<LedgerDef>> {
    if path.is_dir() {
        load_ledger_directory(path)
    } else {
        Ok(vec![parse_ledger(path)?])
    }
}

/// A problem found by [`validate_ledger`].
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    /// The offending task, category, person or score, if any.
    pub subject: Option<String>,
    pub message: String,
}

impl ValidationWarning {
    fn new(subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            subject: Some(subject.into()),
            message: message.into(),
        }
    }
}

/// Check a ledger for duplicate keys, invalid formulas and dangling
/// references.
pub fn validate_ledger(def: &LedgerDef, registry: &FormulaRegistry) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();

    let mut categories = HashSet::new();
    for category in &def.categories {
        if !categories.insert(category.slug.as_str()) {
            warnings.push(ValidationWarning::new(
                &category.slug,
                format!("duplicate category slug: {}", category.slug),
            ));
        }
    }

    let mut people = HashSet::new();
    for person in &def.people {
        if !people.insert(person.key.as_str()) {
            warnings.push(ValidationWarning::new(
                &person.key,
                format!("duplicate person key: {}", person.key),
            ));
        }
    }

    let mut tasks = HashSet::new();
    for task in &def.tasks {
        if !tasks.insert(task.slug.as_str()) {
            warnings.push(ValidationWarning::new(
                &task.slug,
                format!("duplicate task slug: {}", task.slug),
            ));
        }
    }

    for task in &def.tasks {
        if !categories.contains(task.category.as_str()) {
            warnings.push(ValidationWarning::new(
                &task.slug,
                format!("category {} is not declared", task.category),
            ));
        }
        if let Some(formula) = &task.formula {
            check_formula(
                registry,
                formula,
                &task.slug,
                Some(&task.category),
                &tasks,
                &categories,
                &mut warnings,
            );
        }
    }

    let mut scored = HashSet::new();
    for score in &def.scores {
        let subject = format!("{}/{}", score.task, score.person);
        if !tasks.contains(score.task.as_str()) {
            warnings.push(ValidationWarning::new(
                &subject,
                format!("score refers to unknown task {}", score.task),
            ));
        }
        if !people.contains(score.person.as_str()) {
            warnings.push(ValidationWarning::new(
                &subject,
                format!("score refers to unknown person {}", score.person),
            ));
        }
        if !scored.insert((score.task.as_str(), score.person.as_str())) {
            warnings.push(ValidationWarning::new(&subject, "score is listed twice"));
        }
        if let Some(formula) = &score.formula {
            let own_category = def
                .tasks
                .iter()
                .find(|t| t.slug == score.task)
                .map(|t| t.category.as_str());
            check_formula(
                registry,
                formula,
                &score.task,
                own_category,
                &tasks,
                &categories,
                &mut warnings,
            );
        }
    }

    for response in &def.responses {
        if !tasks.contains(response.task.as_str()) {
            warnings.push(ValidationWarning::new(
                &response.owner,
                format!("response refers to unknown task {}", response.task),
            ));
        }
    }

    warnings
}

fn check_formula(
    registry: &FormulaRegistry,
    formula: &FormulaDef,
    owner: &str,
    owner_category: Option<&str>,
    tasks: &HashSet<&str>,
    categories: &HashSet<&str>,
    warnings: &mut Vec<ValidationWarning>,
) {
    let Ok(kind) = formula.kind.parse::<FormulaKind>() else {
        warnings.push(ValidationWarning::new(
            owner,
            format!("unknown formula type: {}", formula.kind),
        ));
        return;
    };
    let args = normalize_args(&formula.args);
    if !registry.is_valid(kind, &args) {
        warnings.push(ValidationWarning::new(
            owner,
            format!("invalid arguments for {kind} formula: {args}"),
        ));
        return;
    }
    let Ok(calculator) = registry.get(kind) else {
        return;
    };
    let Ok(keys) = calculator.dependencies(&args) else {
        return;
    };
    for key in keys {
        match key.kind {
            DependencyKind::Task if key.slug == owner => warnings.push(ValidationWarning::new(
                owner,
                "formula refers to its own task",
            )),
            DependencyKind::Task if !tasks.contains(key.slug.as_str()) => {
                warnings.push(ValidationWarning::new(
                    owner,
                    format!("formula refers to unknown task {}", key.slug),
                ))
            }
            DependencyKind::Category if owner_category == Some(key.slug.as_str()) => warnings
                .push(ValidationWarning::new(
                    owner,
                    format!("formula aggregates its own category {}", key.slug),
                )),
            DependencyKind::Category if !categories.contains(key.slug.as_str()) => {
                warnings.push(ValidationWarning::new(
                    owner,
                    format!("formula refers to unknown category {}", key.slug),
                ))
            }
            _ => {}
        }
    }
}

fn normalize_args(args: &serde_json::Value) -> serde_json::Value {
    if args.is_null() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        args.clone()
    }
}

/// What [`load_ledger`] created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadSummary {
    pub ledger: LedgerId,
    pub people: usize,
    pub tasks: usize,
    pub scores: usize,
    pub entered: usize,
    pub responses: usize,
}

/// Create the ledger described by `def` in `store`.
///
/// Categories named by tasks but not declared are created on the fly.
/// Every (task, person) pair gets a score; entered values are applied as
/// external edits, so the next recalculation pass picks them up.
pub fn load_ledger<S: Store>(
    store: &mut S,
    registry: &FormulaRegistry,
    def: &LedgerDef,
    skip_matched_responses: bool,
) -> Result<LoadSummary> {
    let ledger = store
        .create_ledger(&def.slug, &def.name)
        .with_context(|| format!("failed to create ledger {}", def.slug))?;

    for category in &def.categories {
        staleness::ensure_category(store, &category.slug, &category.name)?;
    }

    let mut people: HashMap<&str, PersonId> = HashMap::new();
    for person in &def.people {
        let id = store.create_person(Person {
            id: PersonId(0),
            name: person.name.clone(),
            student_number: person.student_number.clone(),
            device_ids: person.device_ids.clone(),
            active: true,
        })?;
        store.add_ledger_member(ledger, id)?;
        people.insert(person.key.as_str(), id);
    }

    for task in &def.tasks {
        staleness::ensure_category(store, &task.category, &task.category)?;
        let formula = task
            .formula
            .as_ref()
            .map(|f| store_formula(store, registry, f))
            .transpose()
            .with_context(|| format!("invalid formula on task {}", task.slug))?;
        store
            .create_task(NewTask {
                ledger,
                slug: task.slug.clone(),
                name: task.name.clone(),
                category: task.category.clone(),
                full_marks: task.full_marks.clone(),
                formula,
            })
            .with_context(|| format!("failed to create task {}", task.slug))?;
    }

    let scores = staleness::pad_scores(store, registry, ledger, skip_matched_responses)?;

    let mut entered = 0;
    for score in &def.scores {
        let task = store
            .task_by_slug(ledger, &score.task)
            .with_context(|| format!("score refers to unknown task {}", score.task))?;
        let person = people
            .get(score.person.as_str())
            .copied()
            .with_context(|| format!("score refers to unknown person {}", score.person))?;
        let id = store
            .score_for(task.id, person)
            .with_context(|| format!("no score for {}/{}", score.task, score.person))?
            .id;

        if let Some(value) = &score.value {
            staleness::set_score_value(store, id, value.clone())?;
            entered += 1;
        }
        if let Some(full_marks) = &score.full_marks {
            staleness::set_score_full_marks(store, id, full_marks.clone())?;
        }
        if let Some(formula) = &score.formula {
            let formula = store_formula(store, registry, formula).with_context(|| {
                format!("invalid formula on score {}/{}", score.task, score.person)
            })?;
            staleness::set_score_formula(store, id, Some(formula))?;
        }
    }

    for response in &def.responses {
        let task = store
            .task_by_slug(ledger, &response.task)
            .with_context(|| format!("response refers to unknown task {}", response.task))?;
        store.create_response(
            task.id,
            &response.owner,
            response.score.clone(),
            &response.description,
        )?;
    }

    let summary = LoadSummary {
        ledger,
        people: def.people.len(),
        tasks: def.tasks.len(),
        scores,
        entered,
        responses: def.responses.len(),
    };
    info!(
        ledger = %def.slug,
        people = summary.people,
        tasks = summary.tasks,
        scores = summary.scores,
        "ledger loaded"
    );
    Ok(summary)
}

fn store_formula<S: Store>(
    store: &mut S,
    registry: &FormulaRegistry,
    formula: &FormulaDef,
) -> Result<FormulaId> {
    let kind: FormulaKind = formula.kind.parse()?;
    debug!(%kind, "storing formula");
    Ok(staleness::get_or_create_formula(
        store,
        registry,
        kind,
        formula.args.clone(),
    )?)
}
