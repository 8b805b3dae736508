use serde::{Deserialize, Serialize};

/// A listed equity: exchange symbol plus company name
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Stock {
    pub symbol: String,
    pub name: String,
}

impl Stock {
    pub fn new(symbol: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            name: name.into(),
        }
    }
}

// NSE constituents scanned by default (Yahoo symbols)
pub const NIFTY_50: &[(&str, &str)] = &[
    ("RELIANCE.NS", "Reliance Industries"),
    ("TCS.NS", "Tata Consultancy Services"),
    ("INFY.NS", "Infosys"),
    ("HDFCBANK.NS", "HDFC Bank"),
    ("ICICIBANK.NS", "ICICI Bank"),
    ("ADANIGREEN.NS", "ADANI GREEN"),
    ("ASIANPAINT.NS", "Asian Paints"),
    ("AXISBANK.NS", "Axis Bank"),
    ("BAJAJ-AUTO.NS", "Bajaj Auto"),
    ("BAJFINANCE.NS", "Bajaj Finance"),
    ("BAJAJFINSV.NS", "Bajaj Finserv"),
    ("BHARTIARTL.NS", "Bharti Airtel"),
    ("BRITANNIA.NS", "Britannia Industries"),
    ("CIPLA.NS", "Cipla"),
    ("COALINDIA.NS", "Coal India"),
    ("DIVISLAB.NS", "Divi's Laboratories"),
    ("DRREDDY.NS", "Dr. Reddy's Laboratories"),
    ("EICHERMOT.NS", "Eicher Motors"),
    ("GRASIM.NS", "Grasim Industries"),
    ("HCLTECH.NS", "HCL Technologies"),
    ("HDFCLIFE.NS", "HDFC Life Insurance"),
    ("HEROMOTOCO.NS", "Hero MotoCorp"),
    ("HINDALCO.NS", "Hindalco Industries"),
    ("HINDUNILVR.NS", "Hindustan Unilever"),
    ("INDUSINDBK.NS", "IndusInd Bank"),
    ("ITC.NS", "ITC Ltd"),
    ("JSWSTEEL.NS", "JSW Steel"),
    ("KOTAKBANK.NS", "Kotak Mahindra Bank"),
    ("LT.NS", "Larsen & Toubro"),
    ("M&M.NS", "Mahindra & Mahindra"),
    ("MARUTI.NS", "Maruti Suzuki"),
    ("NESTLEIND.NS", "Nestlé India"),
    ("NTPC.NS", "NTPC"),
    ("ONGC.NS", "Oil & Natural Gas Corporation"),
    ("POWERGRID.NS", "Power Grid Corporation"),
    ("SBIN.NS", "State Bank of India"),
    ("SUNPHARMA.NS", "Sun Pharmaceutical"),
    ("TATACONSUM.NS", "Tata Consumer Products"),
    ("TATAMOTORS.NS", "Tata Motors"),
    ("TATAPOWER.NS", "Tata Power"),
    ("TATASTEEL.NS", "Tata Steel"),
    ("TECHM.NS", "Tech Mahindra"),
    ("ULTRACEMCO.NS", "UltraTech Cement"),
    ("UPL.NS", "UPL Ltd"),
    ("WIPRO.NS", "Wipro"),
];

/// The default screening universe as owned values
pub fn nifty_50() -> Vec<Stock> {
    NIFTY_50
        .iter()
        .map(|(symbol, name)| Stock::new(*symbol, *name))
        .collect()
}

/// Look up a company name, falling back to the symbol itself
pub fn company_name(symbol: &str) -> &str {
    NIFTY_50
        .iter()
        .find(|(s, _)| s.eq_ignore_ascii_case(symbol))
        .map(|(_, name)| *name)
        .unwrap_or(symbol)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_universe_has_unique_symbols() {
        let stocks = nifty_50();
        let mut symbols: Vec<_> = stocks.iter().map(|s| s.symbol.as_str()).collect();
        symbols.sort();
        symbols.dedup();
        assert_eq!(symbols.len(), stocks.len());
        assert!(stocks.iter().all(|s| s.symbol.ends_with(".NS")));
    }

    #[test]
    fn test_company_name_lookup() {
        assert_eq!(company_name("tcs.ns"), "Tata Consultancy Services");
        assert_eq!(company_name("ZOMATO.NS"), "ZOMATO.NS");
    }
}
