//! Lightweight Spanish-language detection.
//!
//! Counts tokens carrying Spanish evidence (common function words, Spanish
//! diacritics, characteristic suffixes) against tokens carrying English
//! evidence (English function words, `-ing`/`-tion` endings). Tokens with no
//! evidence either way (proper nouns, numbers, shared vocabulary) are ignored.

const SPANISH_WORDS: &[&str] = &[
    "el", "la", "los", "las", "un", "una", "unos", "unas", "de", "del", "al", "en", "y",
    "e", "o", "u", "que", "por", "para", "con", "sin", "sobre", "entre", "hasta", "desde",
    "hacia", "como", "pero", "muy", "ya", "su", "sus", "se", "lo", "le", "les", "es",
    "son", "fue", "fueron", "ser", "estar", "ha", "han", "hay", "este", "esta", "estos",
    "estas", "ese", "esa", "eso", "esto", "cuando", "donde", "porque", "si", "tras",
    "durante", "ante", "bajo", "otro", "otra", "otros", "otras", "todo", "todos", "cada",
    "mientras", "aunque", "hoy", "ayer", "nuevo", "nueva", "mayor", "menor", "dijo",
    "gobierno", "presidente", "nacional", "millones", "precio", "mercado",
];

const ENGLISH_WORDS: &[&str] = &[
    "the", "and", "of", "to", "in", "is", "are", "was", "were", "be", "been", "for", "on",
    "with", "that", "this", "these", "those", "it", "its", "by", "from", "at", "as", "an",
    "or", "but", "not", "have", "has", "had", "will", "would", "could", "should", "which",
    "who", "what", "when", "where", "their", "they", "them", "there", "we", "our", "you",
    "your", "she", "his", "her", "about", "after", "before", "than", "into", "over",
    "said", "new", "market", "government", "president", "million", "price", "rates",
];

const SPANISH_MARKS: &[char] = &['á', 'é', 'í', 'ó', 'ú', 'ñ', 'ü'];

const SPANISH_SUFFIXES: &[&str] = &[
    "ción", "ciones", "mente", "dad", "dades", "idad", "anza", "encia", "ancia", "ado",
    "ados", "ada", "adas", "ido", "idos", "ida", "idas", "aje",
];

/// Token counts behind a Spanish ratio.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LanguageProfile {
    /// Tokens with Spanish evidence.
    pub spanish: usize,
    /// Tokens with English evidence.
    pub english: usize,
}

impl LanguageProfile {
    /// Share of evidence-bearing tokens that are Spanish; `0.0` with no evidence.
    pub fn spanish_ratio(&self) -> f64 {
        let total = self.spanish + self.english;
        if total == 0 {
            0.0
        } else {
            self.spanish as f64 / total as f64
        }
    }
}

/// Profiles `text`.
pub fn profile(text: &str) -> LanguageProfile {
    let mut spanish = 0;
    let mut english = 0;
    for token in text
        .split(|c: char| !c.is_alphabetic())
        .filter(|t| !t.is_empty())
    {
        let token = token.to_lowercase();
        if is_spanish(&token) {
            spanish += 1;
        } else if is_english(&token) {
            english += 1;
        }
    }
    LanguageProfile { spanish, english }
}

fn is_spanish(token: &str) -> bool {
    SPANISH_WORDS.contains(&token)
        || token.chars().any(|c| SPANISH_MARKS.contains(&c))
        || (token.chars().count() > 4 && SPANISH_SUFFIXES.iter().any(|s| token.ends_with(s)))
}

fn is_english(token: &str) -> bool {
    ENGLISH_WORDS.contains(&token)
        || (token.len() > 4 && (token.ends_with("ing") || token.ends_with("tion")))
        || (token.len() > 5 && token.ends_with("tions"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spanish_prose_scores_high() {
        let p = profile(
            "El Banco de la República anunció que la inflación se mantendrá estable durante \
             el próximo trimestre, según el informe publicado ayer.",
        );
        assert!(p.spanish_ratio() > 0.9, "{p:?}");
    }

    #[test]
    fn english_prose_scores_low() {
        let p = profile(
            "The central bank said on Tuesday that it would keep rates unchanged, and \
             analysts are expecting a slowdown in the coming months.",
        );
        assert!(p.spanish_ratio() < 0.1, "{p:?}");
    }

    #[test]
    fn text_without_evidence_has_zero_ratio() {
        let p = profile("12345 67,89 ---");
        assert_eq!(p, LanguageProfile { spanish: 0, english: 0 });
        assert_eq!(p.spanish_ratio(), 0.0);
    }

    #[test]
    fn mixed_text_lands_in_between() {
        let p = profile("el dólar sube and the market is falling");
        let ratio = p.spanish_ratio();
        assert!(ratio > 0.2 && ratio < 0.8, "{ratio}");
    }
}
