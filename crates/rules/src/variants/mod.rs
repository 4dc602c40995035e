//! Rule type implementations, one module per `type` tag.

mod any;
mod blacklist;
mod cardinality;
mod change;
mod flatline;
mod frequency;
mod metric_aggregation;
mod new_term;
mod percentage_match;
mod spike;
mod spike_aggregation;
mod whitelist;

#[cfg(test)]
pub(crate) mod test_support;

pub use any::AnyRule;
pub use blacklist::BlacklistRule;
pub use cardinality::CardinalityRule;
pub use change::ChangeRule;
pub use flatline::FlatlineRule;
pub use frequency::FrequencyRule;
pub use metric_aggregation::{MetricAggType, MetricAggregationRule};
pub use new_term::NewTermRule;
pub use percentage_match::PercentageMatchRule;
pub use spike::{SpikeRule, SpikeType};
pub use spike_aggregation::SpikeAggregationRule;
pub use whitelist::WhitelistRule;
