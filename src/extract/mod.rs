//! Extraction strategies. A strategy is a pure function from a parsed page to candidates;
//! per page archetype strategies form a fallback chain.

pub mod images;
pub mod rules;
pub mod strategies;

pub use images::{scan_image_urls, ChapterImageRules, READER_IMAGES};
pub use rules::{CoverRule, FieldRules, StatusRule, TitleRule, CARD_NOISE};
pub use strategies::{AnchorScan, DataIslandScan, ItemScan, LinkFilter, SectionScan};

use crate::document::RawDocument;
use crate::model::Candidate;
use crate::scraper::ParseError;

/// One extraction strategy for one page archetype.
pub trait Strategy: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    fn extract(&self, doc: &RawDocument) -> Result<Vec<Candidate>, ParseError>;
}

/// Run `strategy`, logging and swallowing its error as zero candidates.
pub fn run_guarded(strategy: &dyn Strategy, doc: &RawDocument) -> Vec<Candidate> {
    match strategy.extract(doc) {
        Ok(found) => {
            tracing::debug!(strategy = strategy.name(), count = found.len(), "strategy finished");
            found
        }
        Err(e) => {
            tracing::warn!(
                strategy = strategy.name(),
                error = %e,
                "strategy failed; treating as empty"
            );
            Vec::new()
        }
    }
}

/// Fallback chain: the first strategy yielding at least one candidate wins.
pub fn run_chain(chain: &[Box<dyn Strategy>], doc: &RawDocument) -> Vec<Candidate> {
    for strategy in chain {
        let found = run_guarded(strategy.as_ref(), doc);
        if !found.is_empty() {
            return found;
        }
    }
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Failing;

    impl Strategy for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn extract(&self, _doc: &RawDocument) -> Result<Vec<Candidate>, ParseError> {
            Err(ParseError::malformed("unexpected markup"))
        }
    }

    struct Fixed(&'static [&'static str]);

    impl Strategy for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn extract(&self, _doc: &RawDocument) -> Result<Vec<Candidate>, ParseError> {
            Ok(self.0.iter().map(|u| Candidate::new(*u)).collect())
        }
    }

    #[test]
    fn chain_skips_errors_and_empties() -> Result<(), ParseError> {
        let doc = RawDocument::parse("<p>x</p>", "https://example.com")?;
        let chain: Vec<Box<dyn Strategy>> = vec![
            Box::new(Failing),
            Box::new(Fixed(&[])),
            Box::new(Fixed(&["series/a", "series/b"])),
            Box::new(Fixed(&["series/never"])),
        ];
        let found = run_chain(&chain, &doc);
        assert_eq!(found, [Candidate::new("series/a"), Candidate::new("series/b")]);
        Ok(())
    }

    #[test]
    fn all_failing_chain_is_empty() -> Result<(), ParseError> {
        let doc = RawDocument::parse("<p>x</p>", "https://example.com")?;
        let chain: Vec<Box<dyn Strategy>> = vec![Box::new(Failing)];
        assert!(run_chain(&chain, &doc).is_empty());
        Ok(())
    }
}
