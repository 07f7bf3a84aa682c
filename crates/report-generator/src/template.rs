//! Morning report HTML. Pure placeholder substitution; all logic lives in
//! the generator. Rendering-layer templates proper are external
//! collaborators; this document is the data they consume.

pub const MORNING_REPORT: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>Morning Report {{RUN_DATE}}</title>
</head>
<body style="font-family:Arial,Helvetica,sans-serif;background:#f8fafc;margin:0;padding:24px;">
<div style="max-width:860px;margin:0 auto;background:#fff;border-radius:8px;overflow:hidden;border:1px solid #e2e8f0;">
  <div style="background:#0f172a;color:#fff;padding:16px 24px;">
    <h1 style="margin:0;font-size:20px;">Overnight Screen &mdash; {{RUN_DATE}}</h1>
    <p style="margin:4px 0 0;color:#94a3b8;font-size:13px;">Run {{RUN_ID}} &middot; status {{STATUS}}</p>
  </div>
  <div style="padding:16px 24px;">
    <h2 style="font-size:16px;margin:0 0 8px;">Market Context</h2>
    <table style="width:100%;border-collapse:collapse;font-size:14px;">
      <tr><td style="padding:6px 12px;color:#94a3b8;">Predicted opening gap</td><td style="padding:6px 12px;font-weight:600;">{{GAP_PCT}}%</td></tr>
      <tr style="background:#f8fafc;"><td style="padding:6px 12px;color:#94a3b8;">Market score</td><td style="padding:6px 12px;font-weight:600;">{{MARKET_SCORE}} ({{BAND}})</td></tr>
      <tr><td style="padding:6px 12px;color:#94a3b8;">Regime</td><td style="padding:6px 12px;font-weight:600;">{{REGIME}}</td></tr>
      <tr style="background:#f8fafc;"><td style="padding:6px 12px;color:#94a3b8;">Crash risk</td><td style="padding:6px 12px;font-weight:600;">{{CRASH_RISK}}</td></tr>
    </table>
    <h2 style="font-size:16px;margin:20px 0 8px;">Top Opportunities</h2>
    <table style="width:100%;border-collapse:collapse;font-size:13px;">
      <tr style="background:#0f172a;color:#fff;">
        <th style="padding:6px 10px;text-align:left;">#</th>
        <th style="padding:6px 10px;text-align:left;">Symbol</th>
        <th style="padding:6px 10px;text-align:left;">Sector</th>
        <th style="padding:6px 10px;text-align:right;">Price</th>
        <th style="padding:6px 10px;text-align:left;">Signal</th>
        <th style="padding:6px 10px;text-align:right;">Confidence</th>
        <th style="padding:6px 10px;text-align:right;">Score</th>
      </tr>
{{OPPORTUNITY_ROWS}}
    </table>
  </div>
  <div style="padding:12px 24px;background:#f8fafc;color:#64748b;font-size:12px;">
    Generated overnight for morning review. No trading instruction is implied.
  </div>
</div>
</body>
</html>
"#;

pub const OPPORTUNITY_ROW: &str = r#"      <tr style="background:{{ROW_BG}};">
        <td style="padding:6px 10px;">{{RANK}}</td>
        <td style="padding:6px 10px;font-weight:600;">{{SYMBOL}}</td>
        <td style="padding:6px 10px;">{{SECTOR}}</td>
        <td style="padding:6px 10px;text-align:right;">{{PRICE}}</td>
        <td style="padding:6px 10px;color:{{SIGNAL_COLOR}};font-weight:600;">{{SIGNAL}}</td>
        <td style="padding:6px 10px;text-align:right;">{{CONFIDENCE}}%</td>
        <td style="padding:6px 10px;text-align:right;">{{COMBINED}}</td>
      </tr>
"#;

pub const EMPTY_ROW: &str = r#"      <tr><td colspan="7" style="padding:12px;color:#94a3b8;text-align:center;">No opportunities produced this run.</td></tr>
"#;
