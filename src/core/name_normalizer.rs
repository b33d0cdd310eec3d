use once_cell::sync::Lazy;
use regex::Regex;

// Applied in order; each match is replaced by a single space.
static REMOVAL_RULES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)^cv[\s_\-]+",
        r"(?i)^cv$",
        r"(?i)[\s_\-]+cv[\s_\-]+",
        r"(?i)[\s_\-]+cv$",
        r"[\d_\-\.\(\)\[\]\{\}]+",
        r"(?i)resume[\s_\-]*",
        r"(?i)curriculum[\s_\-]*vitae[\s_\-]*",
        r"(?i)application[\s_\-]*",
        r"(?i)assessment[\s_\-]*",
        r"(?i)penilaian[\s_\-]*",
        r"^[\s_\-]+",
        r"[\s_\-]+$",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).unwrap())
    .collect()
});

static SEPARATOR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\s_\-]+").unwrap());

const CV_TOKENS: [&str; 3] = ["cv", "c_v", "c-v"];

/// Derives a display-style person name from a raw file name.
///
/// `"CV_jane-doe (2).pdf"` becomes `"Jane Doe"`. Empty input yields an empty
/// string; the output is a fixed point of this function.
pub fn normalize_file_name(file_name: &str) -> String {
    let mut name = strip_extension(file_name).to_string();

    for rule in REMOVAL_RULES.iter() {
        name = rule.replace_all(&name, " ").into_owned();
    }

    let parts: Vec<&str> = SEPARATOR_RE
        .split(&name)
        .filter(|part| !CV_TOKENS.contains(&part.to_lowercase().as_str()))
        .filter(|part| part.chars().count() >= 2)
        .collect();

    title_case(&parts.join(" "))
}

/// Upper-cases the first letter of every alphabetic run and lower-cases the rest.
pub fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut previous_is_letter = false;

    for ch in text.chars() {
        if ch.is_alphabetic() {
            if previous_is_letter {
                out.extend(ch.to_lowercase());
            } else {
                out.extend(ch.to_uppercase());
            }
            previous_is_letter = true;
        } else {
            out.push(ch);
            previous_is_letter = false;
        }
    }

    out
}

fn strip_extension(file_name: &str) -> &str {
    let leading_dots = file_name.len() - file_name.trim_start_matches('.').len();
    match file_name.rfind('.') {
        Some(index) if index > leading_dots => &file_name[..index],
        _ => file_name,
    }
}
