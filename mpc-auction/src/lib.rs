pub mod auction;
pub mod bit_decomposition;
pub mod comparison;
pub mod error;
pub mod mpc_arithmetic;
pub mod output_privacy;
pub mod party;

pub use auction::SecondPriceAuction;
pub use bit_decomposition::{preprocess_random_bit_sharings, BitPool};
pub use comparison::ComparisonCircuit;
pub use error::{validate_bid_vector, AuctionError};
pub use mpc_arithmetic::MpcArithmetic;
pub use output_privacy::{preprocess_output_masks, OutputPrivacy};
pub use party::Party;
