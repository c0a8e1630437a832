pub mod balance;

pub use balance::{
    BalanceReport, BalanceValidator, ConversionDifference, CovariateBalance, BALANCE_INTERPRETATION,
    CONVERSION_INTERPRETATION,
};
