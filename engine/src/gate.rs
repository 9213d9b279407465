use api::models::Product;

use crate::fetcher::RecommendationSet;
use crate::identity::SessionIdentity;

/// What the presentation layer renders for the recommendation rail.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Gate {
    /// A fetch that can still change the decision is outstanding. Not the
    /// same as hidden; its resolution settles the rail either way.
    #[default]
    Loading,
    Hidden,
    Visible(Vec<Product>),
}

impl Gate {
    pub fn should_render(&self) -> bool {
        matches!(self, Gate::Visible(_))
    }
}

/// The one place the render decision is computed. All four conditions are
/// independently necessary; losing any of them hides the rail entirely.
pub fn derive(identity: &SessionIdentity, set: &RecommendationSet) -> Gate {
    if identity.eligible() && set.displayable() {
        Gate::Visible(set.products.clone())
    } else {
        Gate::Hidden
    }
}
