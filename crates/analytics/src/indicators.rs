//! 技术指标序列计算。
//!
//! 所有函数输出与输入等长的序列，预热期内为 `None`。
//! 指标描述符语法：`sma_20`、`ema_12`、`rsi_14`、`macd_12_26_9`、`bbands_20_2`、`atr_14`，
//! 省略参数时使用常用默认值。

use crate::error::AnalyticsError;
use kabu_core::market::entity::Bar;
use std::fmt;
use std::str::FromStr;

/// 周期参数上限
pub const MAX_PERIOD: usize = 500;

#[allow(clippy::cast_precision_loss)]
fn to_f64(n: usize) -> f64 {
    n as f64
}

/// 指标序列的一列
pub type Series = Vec<Option<f64>>;

/// # Summary
/// 指标描述符。
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IndicatorSpec {
    Sma(usize),
    Ema(usize),
    Rsi(usize),
    Macd { fast: usize, slow: usize, signal: usize },
    Bollinger { period: usize, k: f64 },
    Atr(usize),
}

impl IndicatorSpec {
    /// 产生第一个有效值所需的最少 Bar 数
    pub fn warmup(&self) -> usize {
        match self {
            IndicatorSpec::Sma(p) | IndicatorSpec::Ema(p) => *p,
            IndicatorSpec::Rsi(p) | IndicatorSpec::Atr(p) => p + 1,
            IndicatorSpec::Macd { slow, signal, .. } => slow + signal - 1,
            IndicatorSpec::Bollinger { period, .. } => *period,
        }
    }

    /// 规范名称，作为输出列名前缀
    pub fn name(&self) -> String {
        self.to_string()
    }

    /// # Summary
    /// 在 Bar 序列上计算指标。
    ///
    /// # Returns
    /// `(列名, 序列)` 列表。单值指标只有一列，列名即指标名；
    /// 多值指标的列名形如 `macd_12_26_9.signal`。
    pub fn compute(&self, bars: &[Bar]) -> Vec<(String, Series)> {
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let name = self.name();
        match *self {
            IndicatorSpec::Sma(p) => vec![(name, sma(&closes, p))],
            IndicatorSpec::Ema(p) => vec![(name, ema(&closes, p))],
            IndicatorSpec::Rsi(p) => vec![(name, rsi(&closes, p))],
            IndicatorSpec::Atr(p) => vec![(name, atr(bars, p))],
            IndicatorSpec::Macd { fast, slow, signal } => {
                let out = macd(&closes, fast, slow, signal);
                vec![
                    (format!("{}.macd", name), out.macd),
                    (format!("{}.signal", name), out.signal),
                    (format!("{}.histogram", name), out.histogram),
                ]
            }
            IndicatorSpec::Bollinger { period, k } => {
                let out = bollinger(&closes, period, k);
                vec![
                    (format!("{}.upper", name), out.upper),
                    (format!("{}.middle", name), out.middle),
                    (format!("{}.lower", name), out.lower),
                ]
            }
        }
    }

    /// 解析逗号分隔的指标列表，重复项只保留一次
    pub fn parse_list(raw: &str) -> Result<Vec<IndicatorSpec>, AnalyticsError> {
        let mut out: Vec<IndicatorSpec> = Vec::new();
        for part in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let spec: IndicatorSpec = part.parse()?;
            if !out.contains(&spec) {
                out.push(spec);
            }
        }
        if out.is_empty() {
            return Err(AnalyticsError::InvalidIndicator(
                "at least one indicator is required".to_string(),
            ));
        }
        Ok(out)
    }
}

impl fmt::Display for IndicatorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndicatorSpec::Sma(p) => write!(f, "sma_{}", p),
            IndicatorSpec::Ema(p) => write!(f, "ema_{}", p),
            IndicatorSpec::Rsi(p) => write!(f, "rsi_{}", p),
            IndicatorSpec::Atr(p) => write!(f, "atr_{}", p),
            IndicatorSpec::Macd { fast, slow, signal } => {
                write!(f, "macd_{}_{}_{}", fast, slow, signal)
            }
            // f64 的 Display 对整数值不输出小数部分 (2.0 -> "2")
            IndicatorSpec::Bollinger { period, k } => write!(f, "bbands_{}_{}", period, k),
        }
    }
}

impl FromStr for IndicatorSpec {
    type Err = AnalyticsError;

    /// # Summary
    /// 解析单个指标描述符。
    ///
    /// # Logic
    /// 1. 以 `_` 分隔名称与参数，名称不区分大小写。
    /// 2. 缺省参数取默认值：sma/ema 20，rsi/atr 14，macd 12/26/9，bbands 20/2。
    /// 3. 周期必须在 `1..=MAX_PERIOD`，MACD 要求 fast < slow，布林带倍数必须为正。
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |msg: &str| AnalyticsError::InvalidIndicator(format!("{}: {}", s, msg));
        let lower = s.trim().to_lowercase();
        let mut parts = lower.split('_');
        let kind = parts.next().unwrap_or_default();
        let args: Vec<&str> = parts.collect();

        let period = |idx: usize, default: usize| -> Result<usize, AnalyticsError> {
            let p = match args.get(idx) {
                Some(raw) => raw
                    .parse::<usize>()
                    .map_err(|_| invalid("period must be a positive integer"))?,
                None => default,
            };
            if p == 0 || p > MAX_PERIOD {
                return Err(invalid("period out of range"));
            }
            Ok(p)
        };
        let max_args = |n: usize| {
            if args.len() > n {
                Err(invalid("too many parameters"))
            } else {
                Ok(())
            }
        };

        let spec = match kind {
            "sma" => {
                max_args(1)?;
                IndicatorSpec::Sma(period(0, 20)?)
            }
            "ema" => {
                max_args(1)?;
                IndicatorSpec::Ema(period(0, 20)?)
            }
            "rsi" => {
                max_args(1)?;
                IndicatorSpec::Rsi(period(0, 14)?)
            }
            "atr" => {
                max_args(1)?;
                IndicatorSpec::Atr(period(0, 14)?)
            }
            "macd" => {
                max_args(3)?;
                let (fast, slow, signal) = (period(0, 12)?, period(1, 26)?, period(2, 9)?);
                if fast >= slow {
                    return Err(invalid("fast period must be smaller than slow period"));
                }
                IndicatorSpec::Macd { fast, slow, signal }
            }
            "bbands" | "bb" | "bollinger" => {
                max_args(2)?;
                let k = match args.get(1) {
                    Some(raw) => raw
                        .parse::<f64>()
                        .map_err(|_| invalid("multiplier must be a number"))?,
                    None => 2.0,
                };
                if !k.is_finite() || k <= 0.0 {
                    return Err(invalid("multiplier must be positive"));
                }
                IndicatorSpec::Bollinger {
                    period: period(0, 20)?,
                    k,
                }
            }
            _ => return Err(invalid("unknown indicator")),
        };
        Ok(spec)
    }
}

/// 简单移动平均
pub fn sma(values: &[f64], period: usize) -> Series {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }
    let mut sum: f64 = values[..period].iter().sum();
    out[period - 1] = Some(sum / to_f64(period));
    for i in period..values.len() {
        sum += values[i] - values[i - period];
        out[i] = Some(sum / to_f64(period));
    }
    out
}

/// 指数移动平均，以前 `period` 个值的 SMA 作为种子
pub fn ema(values: &[f64], period: usize) -> Series {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }
    let multiplier = 2.0 / (to_f64(period) + 1.0);
    let mut prev = values[..period].iter().sum::<f64>() / to_f64(period);
    out[period - 1] = Some(prev);
    for i in period..values.len() {
        prev = (values[i] - prev) * multiplier + prev;
        out[i] = Some(prev);
    }
    out
}

/// # Summary
/// 相对强弱指数 (Wilder 平滑)。
///
/// # Logic
/// 1. 前 `period` 个涨跌幅取简单平均作为初始平均涨幅/跌幅。
/// 2. 之后按 `(prev * (p - 1) + x) / p` 平滑。
/// 3. 平均跌幅为 0 时 RSI 为 100。
pub fn rsi(values: &[f64], period: usize) -> Series {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() <= period {
        return out;
    }
    let p = to_f64(period);
    let value = |gain: f64, loss: f64| {
        if loss == 0.0 {
            100.0
        } else {
            100.0 - 100.0 / (1.0 + gain / loss)
        }
    };

    let (mut avg_gain, mut avg_loss) = (1..=period).fold((0.0, 0.0), |(g, l), i| {
        let change = values[i] - values[i - 1];
        if change > 0.0 {
            (g + change, l)
        } else {
            (g, l - change)
        }
    });
    avg_gain /= p;
    avg_loss /= p;
    out[period] = Some(value(avg_gain, avg_loss));

    for i in (period + 1)..values.len() {
        let change = values[i] - values[i - 1];
        let (gain, loss) = if change > 0.0 {
            (change, 0.0)
        } else {
            (0.0, -change)
        };
        avg_gain = (avg_gain * (p - 1.0) + gain) / p;
        avg_loss = (avg_loss * (p - 1.0) + loss) / p;
        out[i] = Some(value(avg_gain, avg_loss));
    }
    out
}

/// MACD 三条线
#[derive(Debug, Clone)]
pub struct MacdSeries {
    pub macd: Series,
    pub signal: Series,
    pub histogram: Series,
}

/// # Summary
/// MACD：快线 EMA 减慢线 EMA，信号线为 MACD 线的 EMA。
pub fn macd(values: &[f64], fast: usize, slow: usize, signal: usize) -> MacdSeries {
    let fast_ema = ema(values, fast);
    let slow_ema = ema(values, slow);
    let macd_line: Series = fast_ema
        .iter()
        .zip(&slow_ema)
        .map(|(f, s)| Some((*f)? - (*s)?))
        .collect();

    // 信号线只在 MACD 线有值的区段上计算
    let offset = macd_line.iter().position(Option::is_some);
    let mut signal_line = vec![None; values.len()];
    if let Some(offset) = offset {
        let defined: Vec<f64> = macd_line[offset..].iter().map(|v| v.unwrap_or_default()).collect();
        for (i, v) in ema(&defined, signal).into_iter().enumerate() {
            signal_line[offset + i] = v;
        }
    }

    let histogram = macd_line
        .iter()
        .zip(&signal_line)
        .map(|(m, s)| Some((*m)? - (*s)?))
        .collect();
    MacdSeries {
        macd: macd_line,
        signal: signal_line,
        histogram,
    }
}

/// 布林带上中下轨
#[derive(Debug, Clone)]
pub struct BollingerSeries {
    pub upper: Series,
    pub middle: Series,
    pub lower: Series,
}

/// 布林带：中轨为 SMA，上下轨为中轨加减 `k` 倍总体标准差
pub fn bollinger(values: &[f64], period: usize, k: f64) -> BollingerSeries {
    let middle = sma(values, period);
    let mut upper = vec![None; values.len()];
    let mut lower = vec![None; values.len()];
    for (i, mean) in middle.iter().enumerate() {
        let Some(mean) = mean else { continue };
        let window = &values[i + 1 - period..=i];
        let variance =
            window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / to_f64(period);
        let band = variance.sqrt() * k;
        upper[i] = Some(mean + band);
        lower[i] = Some(mean - band);
    }
    BollingerSeries {
        upper,
        middle,
        lower,
    }
}

/// # Summary
/// 平均真实波幅 (Wilder 平滑)。
///
/// # Logic
/// 1. 真实波幅 = max(high - low, |high - 前收|, |low - 前收|)，从第二根 Bar 开始计算。
/// 2. 前 `period` 个真实波幅的简单平均作为初值，其后 Wilder 平滑。
pub fn atr(bars: &[Bar], period: usize) -> Series {
    let mut out = vec![None; bars.len()];
    if period == 0 || bars.len() <= period {
        return out;
    }
    let p = to_f64(period);
    let true_range = |i: usize| {
        let (bar, prev_close) = (&bars[i], bars[i - 1].close);
        (bar.high - bar.low)
            .max((bar.high - prev_close).abs())
            .max((bar.low - prev_close).abs())
    };

    let mut prev = (1..=period).map(true_range).sum::<f64>() / p;
    out[period] = Some(prev);
    for i in (period + 1)..bars.len() {
        prev = (prev * (p - 1.0) + true_range(i)) / p;
        out[i] = Some(prev);
    }
    out
}
