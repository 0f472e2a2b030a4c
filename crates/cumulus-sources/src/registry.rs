//! Adapter construction by source tag

use cumulus_core::SourceTag;

use crate::cooper_hewitt::CooperHewittSource;
use crate::europeana::EuropeanaSource;
use crate::harvard::HarvardSource;
use crate::met::MetSource;
use crate::rijksmuseum::RijksmuseumSource;
use crate::smithsonian::SmithsonianSource;
use crate::source::{Source, SourceSettings};

/// Build the adapter for `tag`; `None` for tags with no API (manual).
///
/// Missing credentials are not checked here: they surface as an
/// authentication failure on the first request, which fails only that source.
pub fn build(tag: SourceTag, settings: &SourceSettings) -> Option<Box<dyn Source>> {
    let source: Box<dyn Source> = match tag {
        SourceTag::Met => Box::new(MetSource::new(settings)),
        SourceTag::Harvard => Box::new(HarvardSource::new(settings)),
        SourceTag::Rijksmuseum => Box::new(RijksmuseumSource::new(settings)),
        SourceTag::CooperHewitt => Box::new(CooperHewittSource::new(settings)),
        SourceTag::Europeana => Box::new(EuropeanaSource::new(settings)),
        SourceTag::Smithsonian => Box::new(SmithsonianSource::new(settings)),
        SourceTag::Manual => return None,
    };
    Some(source)
}

/// Whether the API needs a credential
pub fn requires_key(tag: SourceTag) -> bool {
    !matches!(tag, SourceTag::Met | SourceTag::Manual)
}
