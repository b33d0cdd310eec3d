use super::models::CompetencyRecord;

/// Free-text fields generated from the CV and assessment text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NarrativeField {
    Education,
    Experience,
    BusinessImpact,
    Position,
    ExecutiveSummary,
}

impl NarrativeField {
    pub const ALL: [NarrativeField; 5] = [
        NarrativeField::Education,
        NarrativeField::Experience,
        NarrativeField::BusinessImpact,
        NarrativeField::Position,
        NarrativeField::ExecutiveSummary,
    ];

    pub fn key(self) -> &'static str {
        match self {
            NarrativeField::Education => "education",
            NarrativeField::Experience => "experience",
            NarrativeField::BusinessImpact => "business_impact",
            NarrativeField::Position => "position",
            NarrativeField::ExecutiveSummary => "summary_executive",
        }
    }

    fn instruction(self) -> &'static str {
        match self {
            NarrativeField::Education => EDUCATION,
            NarrativeField::Experience => EXPERIENCE,
            NarrativeField::BusinessImpact => BUSINESS_IMPACT,
            NarrativeField::Position => POSITION,
            NarrativeField::ExecutiveSummary => EXECUTIVE_SUMMARY,
        }
    }

    pub fn prompt(self, source_text: &str) -> String {
        format!("{}\n\nTeks yang akan dianalisis:\n\n{}", self.instruction(), source_text)
    }
}

const EDUCATION: &str = "\
Dari teks CV/penilaian berikut, ekstrak riwayat pendidikan dalam Bahasa Indonesia:
gelar tertinggi, institusi, tahun lulus, dan jurusan.
Tampilkan S1 lebih dulu, lalu S2 jika ada. Hanya tampilkan jenjang yang memang ada.

Format output: \"S1 Teknik Informatika, ITB | S2 Master of Business Administration, ITB\"
Jangan gunakan bintang atau poin-poin dan jangan beri penjelasan.";

const EXPERIENCE: &str = "\
Dari teks CV/penilaian berikut, ekstrak pengalaman kerja dalam Bahasa Indonesia.
Ambil 4 posisi jabatan terakhir saja, masing-masing tiga baris dipisah satu baris kosong:

Direktur Commercial
PT Telekomunikasi Selular
2021 – Saat ini

Head of Human Capital Management
PT Finnet Indonesia
2020 – 2021

Langsung mulai dari posisi pertama tanpa pembuka, tanpa bintang, tanpa penalaran.
Gunakan huruf kapital di awal kata untuk jabatan dan nama perusahaan (PT tetap kapital).";

const BUSINESS_IMPACT: &str = "\
Dari teks CV/penilaian berikut, identifikasi 5 dampak bisnis utama dalam Bahasa Inggris.

ATURAN:
- Tepat 5 poin, format: • [Dampak bisnis]
- Setiap poin 5-7 kata, tanpa konteks tambahan
- Langsung mulai dengan poin pertama, tanpa kalimat pembuka

Contoh:
• Led a major organizational transformation project
• Enhanced Total Rewards framework";

const POSITION: &str = "\
Dari teks CV/penilaian berikut, identifikasi JABATAN TERAKHIR dalam Bahasa Indonesia.
Hanya satu posisi, jawab dengan nama posisinya saja tanpa penjelasan.

Contoh output:
Head of Human Capital Management";

const EXECUTIVE_SUMMARY: &str = "\
Dari teks CV dan assessment berikut, buat Summary Executive profesional dalam Bahasa Indonesia.

Persyaratan:
1. Panjang 3-5 kalimat
2. Sorot posisi terakhir, lama pengalaman, keahlian utama, dan pencapaian signifikan
3. Nada profesional dan ringkas, fokus pada nilai dan kontribusi kandidat

Langsung tulis summary-nya tanpa pembuka.";

const COMPETENCY: &str = "\
Dari data competency berikut, format kompetensi kandidat dalam Bahasa Indonesia.

ATURAN:
1. Urutkan dari level tertinggi ke terendah
2. Hanya kompetensi dengan level >= 2, maksimal 10 kompetensi
3. Format setiap baris: • [Nama Kompetensi] (Lvl. [X]/5), satu spasi setelah bullet, tanpa tab
4. Tanpa penjelasan tambahan

Contoh:
• Career Planning & Succession Management (Lvl. 4/5)
• Talent Scouting & Acquisition (Lvl. 2/5)";

pub fn competency_prompt(records: &[CompetencyRecord]) -> String {
    let data = records
        .iter()
        .map(|record| format!("- {} (Level {}/5)", record.label, record.level))
        .collect::<Vec<_>>()
        .join("\n");

    format!("{COMPETENCY}\n\nData Competency:\n{data}\n\nOutput:")
}
